//! Run directory preparation pipeline.
//!
//! `prepare` sequences validation and staging into one atomic operation:
//! any stage failure rolls the whole run directory back so a partial
//! directory never survives inspection.

pub(crate) mod agrif;
pub(crate) mod decomposition;
pub(crate) mod executables;
pub(crate) mod links;
pub(crate) mod namelists;
pub(crate) mod runfiles;
pub(crate) mod vcs;

use crate::error::PrepareError;
use crate::fspath::resolve_lossy;
use crate::rundesc::{Req, RunDesc};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Create and populate the run directory for the run described in
/// `desc_file`, returning its path.
pub fn prepare(desc_file: &Path, nocheck_init: bool) -> Result<PathBuf> {
    let run_desc = RunDesc::load(desc_file)?;
    let nemo_bin_dir = executables::check_nemo_exec(&run_desc)?;
    let xios_bin_dir = executables::check_xios_exec(&run_desc)?;
    executables::find_rebuild_nemo_script(&run_desc)?;
    let run_set_dir = resolve_lossy(desc_file)
        .parent()
        .map(Path::to_path_buf)
        .context("run description file has no parent directory")?;
    let run_dir = make_run_dir(&run_desc)?;
    namelists::make_namelists(&run_set_dir, &run_desc, &run_dir, None)?;
    runfiles::copy_run_set_files(&run_desc, desc_file, &run_set_dir, &run_dir, None)?;
    executables::make_executable_links(&nemo_bin_dir, &run_dir, &xios_bin_dir)?;
    links::make_grid_links(&run_desc, &run_dir, None)?;
    links::make_forcing_links(&run_desc, &run_dir)?;
    links::make_restart_links(&run_desc, &run_dir, nocheck_init, None)?;
    vcs::record_vcs_revisions(&run_desc, &run_dir)?;
    agrif::add_agrif_files(&run_desc, desc_file, &run_set_dir, &run_dir, nocheck_init)?;
    Ok(run_dir)
}

/// Create the uniquely named directory from which NEMO will be run.
///
/// The location is the runs directory from the run description; the name
/// is the run id combined with a microsecond timestamp, so two
/// preparations never collide.
pub(crate) fn make_run_dir(run_desc: &RunDesc) -> Result<PathBuf> {
    let req = Req::new(run_desc, None);
    let run_id = req.string(&["run_id"])?;
    let runs_dir = req.resolved(&["paths", "runs directory"])?;
    let stamp = Local::now().format("%Y-%m-%dT%H%M%S%.6f%z");
    let run_dir = runs_dir.join(format!("{run_id}_{stamp}"));
    fs::create_dir(&run_dir).with_context(|| format!("create {}", run_dir.display()))?;
    Ok(run_dir)
}

/// Best-effort removal of an in-progress run directory.
///
/// Tolerates a directory that was never created or is already gone, and
/// ignores removal races. A short pause lets the OS flush file buffers
/// before the directory tree is deleted.
pub fn remove_run_dir(run_dir: &Path) {
    thread::sleep(Duration::from_millis(100));
    let _ = fs::remove_dir_all(run_dir);
}

/// Log a fatal configuration error, roll back the run directory when one
/// is under construction, and return the error to terminate preparation.
pub(crate) fn fatal(run_dir: Option<&Path>, msg: String) -> anyhow::Error {
    tracing::error!("{msg}");
    if let Some(run_dir) = run_dir {
        remove_run_dir(run_dir);
    }
    PrepareError::Config(msg).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_run_dir_is_a_no_op_for_missing_directory() {
        remove_run_dir(Path::new("/nonexistent/run/dir"));
    }

    #[test]
    fn remove_run_dir_deletes_populated_directory() {
        let temp = tempfile::tempdir().unwrap();
        let run_dir = temp.path().join("sandbox_run");
        fs::create_dir(&run_dir).unwrap();
        fs::write(run_dir.join("namelist_cfg"), "&nammpp\n/\n").unwrap();
        remove_run_dir(&run_dir);
        assert!(!run_dir.exists());
        // Removing again is still a no-op.
        remove_run_dir(&run_dir);
    }

    #[test]
    fn make_run_dir_uses_run_id_prefix() {
        let temp = tempfile::tempdir().unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "run_id: sandbox\npaths:\n  runs directory: {}\n",
            temp.path().display()
        ))
        .unwrap();
        let run_dir = make_run_dir(&desc).unwrap();
        assert!(run_dir.is_dir());
        let name = run_dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("sandbox_"));
    }
}

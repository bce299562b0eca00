//! Pre-flight checks for the model executables and their symlinks.

use crate::prepare::fatal;
use crate::rundesc::{Req, RunDesc};
use anyhow::{Context, Result};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

const NEMO_CODE_CONFIG_KEYS: [&[&str]; 2] =
    [&["paths", "NEMO code config"], &["paths", "NEMO-code-config"]];
const CONFIG_NAME_KEYS: [&[&str]; 2] = [&["config name"], &["config_name"]];

/// Absolute path of the directory holding the NEMO executable.
///
/// Aborts preparation when the executable has not been built; no run
/// directory exists yet, so there is nothing to roll back.
pub(crate) fn check_nemo_exec(run_desc: &RunDesc) -> Result<PathBuf> {
    let req = Req::new(run_desc, None);
    let nemo_config_dir = req.resolved_first(&NEMO_CODE_CONFIG_KEYS)?;
    let config_name = req.string_first(&CONFIG_NAME_KEYS)?;
    let nemo_bin_dir = nemo_config_dir.join(config_name).join("BLD").join("bin");
    let nemo_exec = nemo_bin_dir.join("nemo.exe");
    if !nemo_exec.exists() {
        return Err(fatal(
            None,
            format!("{} not found - did you forget to build it?", nemo_exec.display()),
        ));
    }
    Ok(nemo_bin_dir)
}

/// Absolute path of the directory holding the XIOS server executable.
pub(crate) fn check_xios_exec(run_desc: &RunDesc) -> Result<PathBuf> {
    let req = Req::new(run_desc, None);
    let xios_code_path = req.resolved(&["paths", "XIOS"])?;
    let xios_bin_dir = xios_code_path.join("bin");
    let xios_exec = xios_bin_dir.join("xios_server.exe");
    if !xios_exec.exists() {
        return Err(fatal(
            None,
            format!("{} not found - did you forget to build it?", xios_exec.display()),
        ));
    }
    Ok(xios_bin_dir)
}

/// Resolved path of the `rebuild_nemo` results-combining script, found as
/// a sibling of the NEMO code config tree.
pub(crate) fn find_rebuild_nemo_script(run_desc: &RunDesc) -> Result<PathBuf> {
    let req = Req::new(run_desc, None);
    let nemo_code_config = req.resolved_first(&NEMO_CODE_CONFIG_KEYS)?;
    let rebuild_nemo_exec = nemo_code_config
        .join("..")
        .join("TOOLS")
        .join("REBUILD_NEMO")
        .join("rebuild_nemo.exe");
    if !rebuild_nemo_exec.exists() {
        return Err(fatal(
            None,
            format!(
                "{} not found - did you forget to build it?",
                rebuild_nemo_exec.display()
            ),
        ));
    }
    let rebuild_nemo_script = rebuild_nemo_exec.with_extension("");
    Ok(crate::fspath::resolve_lossy(&rebuild_nemo_script))
}

/// Create symlinks in the run directory to the NEMO and XIOS executables.
/// Both binaries have already been existence-checked.
pub(crate) fn make_executable_links(
    nemo_bin_dir: &Path,
    run_dir: &Path,
    xios_bin_dir: &Path,
) -> Result<()> {
    let nemo_exec = nemo_bin_dir.join("nemo.exe");
    symlink(&nemo_exec, run_dir.join("nemo.exe"))
        .with_context(|| format!("link {}", nemo_exec.display()))?;
    let xios_server_exec = xios_bin_dir.join("xios_server.exe");
    symlink(&xios_server_exec, run_dir.join("xios_server.exe"))
        .with_context(|| format!("link {}", xios_server_exec.display()))?;
    Ok(())
}

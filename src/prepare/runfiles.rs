//! Run-set file copies: the run description itself and the XIOS control
//! files, copied under the names XIOS expects.

use crate::prepare::fatal;
use crate::rundesc::{Req, RunDesc};
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Copy the run-set files into the run directory.
///
/// The IO defs file becomes `iodef.xml`, the domain defs file
/// `domain_def.xml`, the field defs file `field_def.xml`, and the optional
/// XIOS-2 file defs file `file_def.xml`. AGRIF sub-grids prefix the domain
/// and file defs copies with the sub-grid number.
pub(crate) fn copy_run_set_files(
    run_desc: &RunDesc,
    desc_file: &Path,
    run_set_dir: &Path,
    run_dir: &Path,
    agrif_n: Option<u32>,
) -> Result<()> {
    let req = Req::new(run_desc, Some(run_dir));
    let iodefs = req.resolved_first(&[&["output", "iodefs"], &["output", "files"]])?;
    let desc_file_name = desc_file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .context("run description file has no file name")?;
    let mut run_set_files: Vec<(PathBuf, String)> = vec![
        (iodefs, "iodef.xml".to_string()),
        (run_set_dir.join(&desc_file_name), desc_file_name),
    ];

    let agrif_key = agrif_n.map(|n| format!("AGRIF_{n}"));
    let (domain_keys, legacy_domain_keys, domain_def_filename) = match
        (agrif_key.as_deref(), agrif_n)
    {
        (Some(key), Some(n)) => (
            vec!["output", key, "domaindefs"],
            vec!["output", key, "domain"],
            format!("{n}_domain_def.xml"),
        ),
        _ => (
            vec!["output", "domaindefs"],
            vec!["output", "domain"],
            "domain_def.xml".to_string(),
        ),
    };
    let domains_def = req.resolved_first(&[&domain_keys, &legacy_domain_keys])?;
    let fields_def = req.resolved_first(&[&["output", "fielddefs"], &["output", "fields"]])?;
    run_set_files.push((domains_def, domain_def_filename));
    run_set_files.push((fields_def, "field_def.xml".to_string()));

    let (file_keys, file_def_filename) = match (agrif_key.as_deref(), agrif_n) {
        (Some(key), Some(n)) => (
            vec!["output", key, "filedefs"],
            format!("{n}_file_def.xml"),
        ),
        _ => (vec!["output", "filedefs"], "file_def.xml".to_string()),
    };
    // The filedefs key is optional; it is only used with XIOS-2.
    if let Some(files_def) = req.resolved_optional(&file_keys)? {
        run_set_files.push((files_def, file_def_filename));
    }

    for (source, dest_name) in run_set_files {
        let dest = run_dir.join(&dest_name);
        fs::copy(&source, &dest)
            .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    }
    set_xios_server_mode(run_desc, run_dir)
}

fn using_server_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s*(?i:true|false)\s*<").expect("using_server pattern"))
}

/// Rewrite the `using_server` variable in `iodef.xml` from the
/// `output: separate XIOS server` value in the run description.
fn set_xios_server_mode(run_desc: &RunDesc, run_dir: &Path) -> Result<()> {
    let sep_xios_server = match run_desc.lookup(&["output", "separate XIOS server"]) {
        Ok(value) => value.as_bool().unwrap_or_default(),
        Err(_) => {
            return Err(fatal(
                Some(run_dir),
                "separate XIOS server key/value not found in output section \
                 of YAML run description file. \
                 Please add lines like:\n\
                 \x20 separate XIOS server: True\n\
                 \x20 XIOS servers: 1\n\
                 that say whether to run the XIOS server(s) attached or detached, \
                 and how many of them to use."
                    .to_string(),
            ));
        }
    };
    let iodef_path = run_dir.join("iodef.xml");
    let text = fs::read_to_string(&iodef_path)
        .with_context(|| format!("read {}", iodef_path.display()))?;
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    for line in &mut lines {
        if line.contains("using_server") {
            *line = using_server_pattern()
                .replace(line, format!(">{sep_xios_server}<"))
                .to_string();
            break;
        }
    }
    let mut patched = lines.join("\n");
    if text.ends_with('\n') {
        patched.push('\n');
    }
    fs::write(&iodef_path, patched)
        .with_context(|| format!("write {}", iodef_path.display()))?;
    Ok(())
}

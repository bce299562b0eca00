//! Namelist composition and MPI decomposition patching.

use crate::fspath::expanded_path;
use crate::nml;
use crate::prepare::decomposition::{n_processors, split_decomposition};
use crate::prepare::fatal;
use crate::rundesc::{dotted, Req, RunDesc};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const NEMO_CODE_CONFIG_KEYS: [&[&str]; 2] =
    [&["paths", "NEMO code config"], &["paths", "NEMO-code-config"]];
const CONFIG_NAME_KEYS: [&[&str]; 2] = [&["config name"], &["config_name"]];

/// Build the namelist files for the run (or for AGRIF sub-grid `agrif_n`)
/// by concatenating the lists of namelist section files declared in the
/// run description, then patch the MPI decomposition into `namelist_cfg`.
pub(crate) fn make_namelists(
    run_set_dir: &Path,
    run_desc: &RunDesc,
    run_dir: &Path,
    agrif_n: Option<u32>,
) -> Result<()> {
    let req = Req::new(run_desc, Some(run_dir));
    let nemo_config_dir = req.resolved_first(&NEMO_CODE_CONFIG_KEYS)?;
    let config_name = req.string_first(&CONFIG_NAME_KEYS)?;
    let agrif_key = agrif_n.map(|n| format!("AGRIF_{n}"));
    let section_keys: Vec<&str> = match agrif_key.as_deref() {
        None => vec!["namelists"],
        Some(key) => vec!["namelists", key],
    };
    let namelists = req.value(&section_keys)?;
    let Some(namelists) = namelists.as_mapping() else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "\"{}\" section must be a mapping of namelist files to \
                 lists of namelist section files",
                dotted(&section_keys)
            ),
        ));
    };

    let mut composed_mpi_target = None;
    for name in namelists.keys() {
        let Some(namelist_filename) = name.as_str() else {
            continue;
        };
        if namelist_filename.starts_with("AGRIF") {
            continue;
        }
        let namelist_dest = match agrif_n {
            None => namelist_filename.to_string(),
            Some(n) => format!("{n}_{namelist_filename}"),
        };
        let mut file_keys = section_keys.clone();
        file_keys.push(namelist_filename);
        compose_namelist(&req, run_set_dir, run_dir, &file_keys, &namelist_dest)?;
        if namelist_filename == "namelist_cfg" {
            composed_mpi_target = Some(namelist_dest.clone());
        }

        let ref_namelist = namelist_filename.replace("_cfg", "_ref");
        let ref_declared = namelists
            .iter()
            .any(|(key, _)| key.as_str() == Some(ref_namelist.as_str()));
        if !ref_declared {
            let ref_source = nemo_config_dir
                .join(&config_name)
                .join("EXP00")
                .join(&ref_namelist);
            let ref_dest = run_dir.join(namelist_dest.replace("_cfg", "_ref"));
            fs::copy(&ref_source, &ref_dest)
                .with_context(|| format!("copy reference namelist {}", ref_source.display()))?;
        }
    }

    match composed_mpi_target {
        Some(namelist_filename) => set_mpi_decomposition(&namelist_filename, run_desc, run_dir),
        None => Err(fatal(
            Some(run_dir),
            "No namelist_cfg key found in namelists section of run description".to_string(),
        )),
    }
}

/// Concatenate the declared section files into one namelist, each section
/// followed by a blank line. Missing section files abort with rollback.
fn compose_namelist(
    req: &Req,
    run_set_dir: &Path,
    run_dir: &Path,
    file_keys: &[&str],
    namelist_dest: &str,
) -> Result<()> {
    let section_files = req.value(file_keys)?;
    let Some(section_files) = section_files.as_sequence() else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "\"{}\" value must be a list of namelist section files",
                dotted(file_keys)
            ),
        ));
    };
    let mut contents = String::new();
    for section_file in section_files {
        let Some(section_file) = section_file.as_str() else {
            return Err(fatal(
                Some(run_dir),
                format!(
                    "\"{}\" value must be a list of namelist section files",
                    dotted(file_keys)
                ),
            ));
        };
        let mut section_path = expanded_path(section_file);
        if !section_path.is_absolute() {
            section_path = run_set_dir.join(section_path);
        }
        match fs::read_to_string(&section_path) {
            Ok(text) => {
                contents.push_str(&text);
                contents.push_str("\n\n");
            }
            Err(err) => {
                return Err(fatal(
                    Some(run_dir),
                    format!("{}: {err}", section_path.display()),
                ));
            }
        }
    }
    let dest = run_dir.join(namelist_dest);
    fs::write(&dest, contents).with_context(|| format!("write {}", dest.display()))?;
    Ok(())
}

/// Update the `&nammpp` namelist group with `jpni`/`jpnj` from the
/// `MPI decomposition` key and `jpnij` from processor-count resolution.
pub(crate) fn set_mpi_decomposition(
    namelist_filename: &str,
    run_desc: &RunDesc,
    run_dir: &Path,
) -> Result<()> {
    let decomposition = match run_desc.lookup(&["MPI decomposition"]) {
        Ok(value) => value.as_str().unwrap_or_default().to_string(),
        Err(_) => {
            return Err(fatal(
                Some(run_dir),
                "MPI decomposition value not found in YAML run description file. \
                 Please add a line like:\n\
                 \x20 MPI decomposition: 8x18\n\
                 that says how you want the domain distributed over the \
                 processors in the i (longitude) and j (latitude) dimensions."
                    .to_string(),
            ));
        }
    };
    let Some((jpni, jpnj)) = split_decomposition(&decomposition) else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "cannot parse \"MPI decomposition\" value \"{decomposition}\" - \
                 expected a value like 8x18"
            ),
        ));
    };
    let jpnij = n_processors(run_desc, Some(run_dir))?;
    nml::patch_nammpp(&run_dir.join(namelist_filename), jpni, jpnj, jpnij)
}

//! AGRIF nested sub-grid expansion.
//!
//! Re-invokes the grid-linking, namelist-composition, output-copy, and
//! restart-linking operations once per declared sub-grid, enforcing that
//! every section declares the same, contiguously numbered sub-grid set as
//! the fixed-grids definition file.

use crate::prepare::fatal;
use crate::prepare::{links, namelists, runfiles};
use crate::rundesc::{Req, RunDesc};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Add the file copies and symlinks a nested AGRIF run needs. A run
/// description without an `AGRIF` key is not an AGRIF run; nothing
/// happens.
pub(crate) fn add_agrif_files(
    run_desc: &RunDesc,
    desc_file: &Path,
    run_set_dir: &Path,
    run_dir: &Path,
    nocheck_init: bool,
) -> Result<()> {
    if run_desc.lookup(&["AGRIF"]).is_err() {
        return Ok(());
    }
    let req = Req::new(run_desc, Some(run_dir));
    let fixed_grids = req.resolved(&["AGRIF", "fixed grids"])?;
    let fixed_grids_dest = run_dir.join("AGRIF_FixedGrids.in");
    fs::copy(&fixed_grids, &fixed_grids_dest)
        .with_context(|| format!("copy {}", fixed_grids.display()))?;
    let fixed_grids_text = fs::read_to_string(&fixed_grids_dest)
        .with_context(|| format!("read {}", fixed_grids_dest.display()))?;
    let n_sub_grids = count_sub_grids(&fixed_grids_text);

    let mut sections = vec!["grid", "namelists", "output"];
    if run_desc.lookup(&["restart"]).is_ok() {
        sections.push("restart");
    }
    for section in sections {
        let sub_grid_numbers = section_sub_grids(run_desc, section, run_dir)?;
        check_sub_grid_numbers(section, &sub_grid_numbers, n_sub_grids, run_dir)?;
        for &agrif_n in &sub_grid_numbers {
            match section {
                "grid" => links::make_grid_links(run_desc, run_dir, Some(agrif_n))?,
                "namelists" => {
                    namelists::make_namelists(run_set_dir, run_desc, run_dir, Some(agrif_n))?
                }
                "output" => runfiles::copy_run_set_files(
                    run_desc,
                    desc_file,
                    run_set_dir,
                    run_dir,
                    Some(agrif_n),
                )?,
                _ => links::make_restart_links(run_desc, run_dir, nocheck_init, Some(agrif_n))?,
            }
        }
    }
    Ok(())
}

/// Number of sub-grids declared in a fixed-grids definition file: data
/// rows have 8 whitespace-separated fields; `#` lines are comments.
fn count_sub_grids(fixed_grids_text: &str) -> usize {
    fixed_grids_text
        .lines()
        .filter(|line| !line.starts_with('#') && line.split_whitespace().count() == 8)
        .count()
}

/// Sorted `AGRIF_k` numbers declared in a run description section.
fn section_sub_grids(run_desc: &RunDesc, section: &str, run_dir: &Path) -> Result<Vec<u32>> {
    let value = Req::new(run_desc, Some(run_dir)).value(&[section])?;
    let Some(mapping) = value.as_mapping() else {
        return Ok(Vec::new());
    };
    let mut numbers = Vec::new();
    for key in mapping.keys() {
        let Some(key) = key.as_str() else {
            continue;
        };
        let Some(suffix) = key.strip_prefix("AGRIF") else {
            continue;
        };
        let parsed = suffix.strip_prefix('_').and_then(|n| n.parse::<u32>().ok());
        let Some(agrif_n) = parsed else {
            return Err(fatal(
                Some(run_dir),
                format!(
                    "cannot parse AGRIF sub-grid number from \"{key}\" key in \
                     {section} section - please check your run description file"
                ),
            ));
        };
        numbers.push(agrif_n);
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Every section must declare exactly the sub-grids 1..N from the
/// fixed-grids file; gaps and duplicates are configuration defects.
fn check_sub_grid_numbers(
    section: &str,
    sub_grid_numbers: &[u32],
    n_sub_grids: usize,
    run_dir: &Path,
) -> Result<()> {
    if sub_grid_numbers.len() != n_sub_grids {
        return Err(fatal(
            Some(run_dir),
            format!(
                "Expected {n_sub_grids} AGRIF sub-grids in {section} section, \
                 but found {} - please check your run description file",
                sub_grid_numbers.len()
            ),
        ));
    }
    let contiguous = sub_grid_numbers
        .iter()
        .zip(1..=n_sub_grids as u32)
        .all(|(&found, expected)| found == expected);
    if !contiguous {
        let found: Vec<String> = sub_grid_numbers.iter().map(u32::to_string).collect();
        return Err(fatal(
            Some(run_dir),
            format!(
                "AGRIF sub-grids in {section} section must be numbered 1 through \
                 {n_sub_grids}, but found {} - please check your run description file",
                found.join(", ")
            ),
        ));
    }
    Ok(())
}

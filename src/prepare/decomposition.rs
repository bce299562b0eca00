//! MPI decomposition parsing and processor-count resolution.

use crate::error::PrepareError;
use crate::fspath::expanded_path;
use crate::prepare::fatal;
use crate::rundesc::{Req, RunDesc};
use anyhow::{Context, Result};
use serde_yaml::Value;
use std::fs;
use std::path::Path;

const LPE_KEYS: [&[&str]; 2] = [
    &["grid", "land processor elimination"],
    &["grid", "Land processor elimination"],
];

/// Parse an `"IxJ"` decomposition string into its i and j dimensions.
pub(crate) fn split_decomposition(value: &str) -> Option<(u32, u32)> {
    let (jpni, jpnj) = value.split_once('x')?;
    let jpni = jpni.trim().parse().ok()?;
    let jpnj = jpnj.trim().parse().ok()?;
    if jpni == 0 || jpnj == 0 {
        return None;
    }
    Some((jpni, jpnj))
}

/// Total number of processors required for the run.
///
/// Without land processor elimination this is `I*J` from the
/// `MPI decomposition` key; with it, the count comes from the elimination
/// table row matching the decomposition. A requested elimination with no
/// matching row is `PrepareError::DecompositionNotFound`.
pub fn n_processors(run_desc: &RunDesc, run_dir: Option<&Path>) -> Result<u32> {
    let req = Req::new(run_desc, run_dir);
    let decomposition = req.string(&["MPI decomposition"])?;
    let Some((jpni, jpnj)) = split_decomposition(&decomposition) else {
        return Err(fatal(
            run_dir,
            format!(
                "cannot parse \"MPI decomposition\" value \"{decomposition}\" - \
                 expected a value like 8x18"
            ),
        ));
    };

    let lpe_value = match run_desc.lookup_first(&LPE_KEYS) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                "No grid: land processor elimination: key found in run \
                 description YAML file, so proceeding on the assumption that \
                 you want to run without land processor elimination"
            );
            return Ok(jpni * jpnj);
        }
    };
    let mapping_path = match lpe_value {
        Value::Null | Value::Bool(false) => return Ok(jpni * jpnj),
        Value::String(text) if text.is_empty() => return Ok(jpni * jpnj),
        Value::String(text) => expanded_path(text),
        _ => {
            return Err(fatal(
                run_dir,
                "\"grid: land processor elimination\" value must be false or \
                 the path of a processor elimination table file"
                    .to_string(),
            ));
        }
    };
    let mapping_path = if mapping_path.is_absolute() {
        mapping_path
    } else {
        let nemo_forcing_dir = req.resolved(&["paths", "forcing"])?;
        nemo_forcing_dir.join("grid").join(mapping_path)
    };
    match lookup_lpe_n_processors(&mapping_path, jpni, jpnj)? {
        Some(n_processors) => Ok(n_processors),
        None => {
            let err = PrepareError::DecompositionNotFound { jpni, jpnj };
            tracing::error!("{err}");
            Err(err.into())
        }
    }
}

/// Scan a table of `I,J,N` rows for the first exact decomposition match.
fn lookup_lpe_n_processors(mapping_path: &Path, jpni: u32, jpnj: u32) -> Result<Option<u32>> {
    let text = fs::read_to_string(mapping_path)
        .with_context(|| format!("read {}", mapping_path.display()))?;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((row_jpni, row_jpnj, row_n)) = parse_lpe_row(line) else {
            anyhow::bail!(
                "malformed land processor elimination row {line:?} in {}",
                mapping_path.display()
            );
        };
        if jpni == row_jpni && jpnj == row_jpnj {
            return Ok(Some(row_n));
        }
    }
    Ok(None)
}

fn parse_lpe_row(line: &str) -> Option<(u32, u32, u32)> {
    let mut fields = line.split(',').map(str::trim);
    let i = fields.next()?.parse().ok()?;
    let j = fields.next()?.parse().ok()?;
    let n = fields.next()?.parse().ok()?;
    Some((i, j, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn splits_well_formed_decomposition() {
        assert_eq!(split_decomposition("8x18"), Some((8, 18)));
        assert_eq!(split_decomposition("1x1"), Some((1, 1)));
    }

    #[test]
    fn rejects_malformed_decomposition() {
        assert_eq!(split_decomposition("8"), None);
        assert_eq!(split_decomposition("8x"), None);
        assert_eq!(split_decomposition("0x4"), None);
        assert_eq!(split_decomposition("axb"), None);
    }

    #[test]
    fn without_elimination_returns_product() {
        let desc = RunDesc::from_yaml("MPI decomposition: 8x18\n").unwrap();
        assert_eq!(n_processors(&desc, None).unwrap(), 144);
    }

    #[test]
    fn falsy_elimination_returns_product_without_warning() {
        let desc = RunDesc::from_yaml(
            "MPI decomposition: 8x18\ngrid:\n  land processor elimination: false\n",
        )
        .unwrap();
        assert_eq!(n_processors(&desc, None).unwrap(), 144);
    }

    #[test]
    fn elimination_table_row_wins_over_product() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("lpe.csv");
        fs::write(&table, "4,5,14\n8,18,138\n").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "MPI decomposition: 8x18\ngrid:\n  land processor elimination: {}\n",
            table.display()
        ))
        .unwrap();
        assert_eq!(n_processors(&desc, None).unwrap(), 138);
    }

    #[test]
    fn legacy_cased_elimination_key_is_honoured() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("lpe.csv");
        fs::write(&table, "8,18,138\n").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "MPI decomposition: 8x18\ngrid:\n  Land processor elimination: {}\n",
            table.display()
        ))
        .unwrap();
        assert_eq!(n_processors(&desc, None).unwrap(), 138);
    }

    #[test]
    fn missing_table_row_is_decomposition_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("lpe.csv");
        fs::write(&table, "4,5,14\n").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "MPI decomposition: 8x18\ngrid:\n  land processor elimination: {}\n",
            table.display()
        ))
        .unwrap();
        let err = n_processors(&desc, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepareError>(),
            Some(PrepareError::DecompositionNotFound { jpni: 8, jpnj: 18 })
        ));
    }

    #[test]
    fn relative_table_path_resolves_under_forcing_grid() {
        let temp = tempfile::tempdir().unwrap();
        let grid_dir = temp.path().join("forcing/grid");
        fs::create_dir_all(&grid_dir).unwrap();
        fs::write(grid_dir.join("lpe.csv"), "2,3,5\n").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "MPI decomposition: 2x3\n\
             paths:\n\
             \x20 forcing: {}/forcing\n\
             grid:\n\
             \x20 land processor elimination: lpe.csv\n",
            temp.path().display()
        ))
        .unwrap();
        assert_eq!(n_processors(&desc, None).unwrap(), 5);
    }
}

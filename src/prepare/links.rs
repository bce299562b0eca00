//! Symbolic links from the run directory to grid, forcing, and restart
//! files, with type-specific link validation.

use crate::fspath::{expanded_path, resolve_lossy};
use crate::nml::{Namelist, NmlValue};
use crate::prepare::fatal;
use crate::rundesc::{dotted, Req, RunDesc};
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// Optional `check link` block of a forcing entry.
#[derive(Debug, Deserialize)]
struct LinkCheck {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "namelist filename")]
    namelist_filename: String,
}

/// Create symlinks to the coordinates and bathymetry files under the names
/// NEMO expects; AGRIF sub-grid links are prefixed with the sub-grid
/// number (e.g. `1_coordinates.nc`).
pub(crate) fn make_grid_links(
    run_desc: &RunDesc,
    run_dir: &Path,
    agrif_n: Option<u32>,
) -> Result<()> {
    let req = Req::new(run_desc, Some(run_dir));
    let agrif_key = agrif_n.map(|n| format!("AGRIF_{n}"));
    let (coords_keys, coords_filename, bathy_keys, bathy_filename) = match
        (agrif_key.as_deref(), agrif_n)
    {
        (Some(key), Some(n)) => (
            vec!["grid", key, "coordinates"],
            format!("{n}_coordinates.nc"),
            vec!["grid", key, "bathymetry"],
            format!("{n}_bathy_meter.nc"),
        ),
        _ => (
            vec!["grid", "coordinates"],
            "coordinates.nc".to_string(),
            vec!["grid", "bathymetry"],
            "bathy_meter.nc".to_string(),
        ),
    };
    let coords_path = req.expanded(&coords_keys)?;
    let bathy_path = req.expanded(&bathy_keys)?;
    let grid_paths = if coords_path.is_absolute() && bathy_path.is_absolute() {
        vec![(coords_path, coords_filename), (bathy_path, bathy_filename)]
    } else {
        let nemo_forcing_dir = req.resolved(&["paths", "forcing"])?;
        let grid_dir = nemo_forcing_dir.join("grid");
        vec![
            (grid_dir.join(coords_path), coords_filename),
            (grid_dir.join(bathy_path), bathy_filename),
        ]
    };
    for (source, link_name) in grid_paths {
        if !source.exists() {
            return Err(fatal(
                Some(run_dir),
                format!(
                    "{} not found; cannot create symlink - \
                     please check the forcing path and grid file names \
                     in your run description file",
                    source.display()
                ),
            ));
        }
        symlink(&source, run_dir.join(&link_name))
            .with_context(|| format!("link {}", source.display()))?;
    }
    Ok(())
}

/// Create a symlink for every entry in the `forcing` section and run its
/// declared link checker, if any.
pub(crate) fn make_forcing_links(run_desc: &RunDesc, run_dir: &Path) -> Result<()> {
    let req = Req::new(run_desc, Some(run_dir));
    let forcing = req.value(&["forcing"])?;
    let Some(forcing) = forcing.as_mapping() else {
        return Err(fatal(
            Some(run_dir),
            "\"forcing\" section must be a mapping of link names to \
             forcing file declarations"
                .to_string(),
        ));
    };
    for name in forcing.keys() {
        let Some(link_name) = name.as_str() else {
            continue;
        };
        let source = resolve_forcing_path(&req, run_desc, link_name, run_dir)?;
        if !source.exists() {
            return Err(fatal(
                Some(run_dir),
                format!(
                    "{} not found; cannot create symlink - \
                     please check the forcing paths and file names \
                     in your run description file",
                    source.display()
                ),
            ));
        }
        symlink(&source, run_dir.join(link_name))
            .with_context(|| format!("link {}", source.display()))?;
        check_forcing_link(run_desc, run_dir, link_name, &source)?;
    }
    Ok(())
}

/// Resolve a forcing entry's `link to` target: absolute paths are
/// canonicalized, relative paths are appended to the forcing root.
fn resolve_forcing_path(
    req: &Req,
    run_desc: &RunDesc,
    link_name: &str,
    run_dir: &Path,
) -> Result<PathBuf> {
    let keys = ["forcing", link_name, "link to"];
    let Ok(value) = run_desc.lookup(&keys) else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "\"{}\" key not found - please check your run description YAML file",
                dotted(&keys)
            ),
        ));
    };
    let Some(text) = value.as_str() else {
        return Err(fatal(
            Some(run_dir),
            format!("\"{}\" value must be a path", dotted(&keys)),
        ));
    };
    let path = expanded_path(text);
    if path.is_absolute() {
        return Ok(resolve_lossy(&path));
    }
    let nemo_forcing_dir = req.resolved(&["paths", "forcing"])?;
    Ok(nemo_forcing_dir.join(path))
}

fn check_forcing_link(
    run_desc: &RunDesc,
    run_dir: &Path,
    link_name: &str,
    source: &Path,
) -> Result<()> {
    let Ok(check_value) = run_desc.lookup(&["forcing", link_name, "check link"]) else {
        return Ok(());
    };
    let check: LinkCheck = serde_yaml::from_value(check_value.clone()).map_err(|_| {
        fatal(
            Some(run_dir),
            format!("unknown forcing link checker: {check_value:?}"),
        )
    })?;
    match check.kind.as_str() {
        "atmospheric" => {
            check_atmospheric_forcing_link(run_dir, source, &check.namelist_filename)
        }
        other => Err(fatal(
            Some(run_dir),
            format!("unknown forcing link checker: {other}"),
        )),
    }
}

/// Confirm that every atmospheric forcing file the run will read exists.
///
/// The surface boundary namelist names the required quantities and their
/// file name roots; the run namelist gives the start date, iteration
/// bounds, and timestep from which the simulated date range is computed.
/// The range is extended one day earlier to cover boundary interpolation.
fn check_atmospheric_forcing_link(
    run_dir: &Path,
    link_path: &Path,
    namelist_filename: &str,
) -> Result<()> {
    let namelist = Namelist::read(&run_dir.join(namelist_filename))?;
    let param = |group: &str, key: &str| -> Result<NmlValue> {
        namelist.scalar(group, key).cloned().ok_or_else(|| {
            fatal(
                Some(run_dir),
                format!("&{group} {key} not found in {namelist_filename}"),
            )
        })
    };
    if param("namsbc", "ln_blk_core")?.as_bool() != Some(true) {
        return Ok(());
    }
    let nn_date0 = param("namrun", "nn_date0")?.as_i64().unwrap_or_default();
    let Some(start_date) = parse_date0(nn_date0) else {
        return Err(fatal(
            Some(run_dir),
            format!("cannot parse nn_date0 value {nn_date0} as a YYYYMMDD date"),
        ));
    };
    let it000 = param("namrun", "nn_it000")?.as_i64().unwrap_or_default();
    let itend = param("namrun", "nn_itend")?.as_i64().unwrap_or_default();
    let dt = param("namdom", "rn_rdt")?.as_f64().unwrap_or_default();
    let run_seconds = ((itend - it000) as f64 * dt - 1.0).max(0.0) as u64;
    let end_date = start_date
        .and_hms_opt(0, 0, 0)
        .map(|start| start + chrono::Duration::seconds(run_seconds as i64))
        .map(|end| end.date())
        .unwrap_or(start_date);
    let startm1 = start_date.checked_sub_days(Days::new(1)).unwrap_or(start_date);

    let mut file_info: Vec<(String, String, String)> = Vec::new();
    let core_dir = param("namsbc_core", "cn_dir")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let qtys = [
        "sn_wndi", "sn_wndj", "sn_qsr", "sn_qlw", "sn_tair", "sn_humi", "sn_prec", "sn_snow",
    ];
    for qty in qtys {
        let values = namelist.values("namsbc_core", qty).unwrap_or_default();
        let (basename, period) = flread_params(values).ok_or_else(|| {
            fatal(
                Some(run_dir),
                format!("&namsbc_core {qty} not found in {namelist_filename}"),
            )
        })?;
        file_info.push((core_dir.clone(), basename, period));
    }
    if param("namsbc", "ln_apr_dyn")?.as_bool() == Some(true) {
        let apr_dir = param("namsbc_apr", "cn_dir")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let values = namelist.values("namsbc_apr", "sn_apr").unwrap_or_default();
        let (basename, period) = flread_params(values).ok_or_else(|| {
            fatal(
                Some(run_dir),
                format!("&namsbc_apr sn_apr not found in {namelist_filename}"),
            )
        })?;
        file_info.push((apr_dir, basename, period));
    }

    let mut date = startm1;
    while date <= end_date {
        for (dir, basename, period) in &file_info {
            let file_path = match period.as_str() {
                "daily" => Path::new(dir).join(atmos_daily_file_name(basename, date)),
                _ => Path::new(dir).join(format!("{basename}.nc")),
            };
            if !run_dir.join(&file_path).exists() {
                return Err(fatal(
                    Some(run_dir),
                    format!(
                        "{} not found; please confirm that atmospheric forcing \
                         files for {} through {} are in the {} collection, \
                         and that atmospheric forcing paths in your run description \
                         and surface boundary conditions namelist are in agreement.",
                        file_path.display(),
                        startm1.format("%Y-%m-%d"),
                        end_date.format("%Y-%m-%d"),
                        link_path.display()
                    ),
                ));
            }
        }
        let Some(next) = date.checked_add_days(Days::new(1)) else {
            break;
        };
        date = next;
    }
    Ok(())
}

fn parse_date0(nn_date0: i64) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&nn_date0.to_string(), "%Y%m%d").ok()
}

fn atmos_daily_file_name(basename: &str, date: NaiveDate) -> String {
    format!("{basename}_{}.nc", date.format("y%Ym%md%d"))
}

/// File name root and read period from a surface-boundary file-read
/// parameter array.
fn flread_params(values: &[NmlValue]) -> Option<(String, String)> {
    let basename = values.first()?.as_str()?.to_string();
    let period = values.get(5)?.as_str()?.to_string();
    Some((basename, period))
}

/// Create symlinks to the restart files declared in the `restart` section
/// (or its AGRIF sub-section). An absent section warns and proceeds on the
/// assumption that initial conditions are supplied another way.
pub(crate) fn make_restart_links(
    run_desc: &RunDesc,
    run_dir: &Path,
    nocheck_init: bool,
    agrif_n: Option<u32>,
) -> Result<()> {
    let req = Req::new(run_desc, Some(run_dir));
    let agrif_key = agrif_n.map(|n| format!("AGRIF_{n}"));
    let section_keys: Vec<&str> = match agrif_key.as_deref() {
        None => vec!["restart"],
        Some(key) => vec!["restart", key],
    };
    let Ok(section) = run_desc.lookup(&section_keys) else {
        tracing::warn!(
            "No restart section found in run description YAML file, \
             so proceeding on the assumption that initial conditions \
             have been provided"
        );
        return Ok(());
    };
    let Some(section) = section.as_mapping() else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "\"{}\" section must be a mapping of link names to restart file paths",
                dotted(&section_keys)
            ),
        ));
    };
    for name in section.keys() {
        let Some(link_name) = name.as_str() else {
            continue;
        };
        if link_name.starts_with("AGRIF") {
            continue;
        }
        let mut item_keys = section_keys.clone();
        item_keys.push(link_name);
        let link_dest = match agrif_n {
            None => link_name.to_string(),
            Some(n) => format!("{n}_{link_name}"),
        };
        let source = req.expanded(&item_keys)?;
        if !source.exists() && !nocheck_init {
            return Err(fatal(
                Some(run_dir),
                format!(
                    "{} not found; cannot create symlink - \
                     please check the restart file paths and file names \
                     in your run description file",
                    source.display()
                ),
            ));
        }
        let target = if nocheck_init {
            source
        } else {
            resolve_lossy(&source)
        };
        symlink(&target, run_dir.join(&link_dest))
            .with_context(|| format!("link {}", target.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepareError;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        _temp: tempfile::TempDir,
        root: PathBuf,
        run_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let run_dir = root.join("run");
        fs::create_dir(&run_dir).unwrap();
        fs::create_dir_all(root.join("forcing/grid")).unwrap();
        Fixture {
            _temp: temp,
            root,
            run_dir,
        }
    }

    fn grid_desc(fixture: &Fixture) -> RunDesc {
        RunDesc::from_yaml(&format!(
            "paths:\n\
             \x20 forcing: {root}/forcing\n\
             grid:\n\
             \x20 coordinates: coords.nc\n\
             \x20 bathymetry: bathy.nc\n",
            root = fixture.root.display()
        ))
        .unwrap()
    }

    #[test]
    fn grid_links_use_nemo_file_names() {
        let fixture = fixture();
        fs::write(fixture.root.join("forcing/grid/coords.nc"), b"").unwrap();
        fs::write(fixture.root.join("forcing/grid/bathy.nc"), b"").unwrap();
        let desc = grid_desc(&fixture);
        make_grid_links(&desc, &fixture.run_dir, None).unwrap();
        let coords = fs::read_link(fixture.run_dir.join("coordinates.nc")).unwrap();
        assert!(coords.ends_with("forcing/grid/coords.nc"));
        let bathy = fs::read_link(fixture.run_dir.join("bathy_meter.nc")).unwrap();
        assert!(bathy.ends_with("forcing/grid/bathy.nc"));
    }

    #[test]
    fn missing_grid_file_is_fatal_naming_the_path() {
        let fixture = fixture();
        fs::write(fixture.root.join("forcing/grid/coords.nc"), b"").unwrap();
        let desc = grid_desc(&fixture);
        let err = make_grid_links(&desc, &fixture.run_dir, None).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("bathy.nc not found"));
        assert!(!fixture.run_dir.exists());
    }

    #[test]
    fn agrif_grid_links_are_prefixed() {
        let fixture = fixture();
        fs::write(fixture.root.join("forcing/grid/sub_coords.nc"), b"").unwrap();
        fs::write(fixture.root.join("forcing/grid/sub_bathy.nc"), b"").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "paths:\n\
             \x20 forcing: {root}/forcing\n\
             grid:\n\
             \x20 AGRIF_1:\n\
             \x20   coordinates: sub_coords.nc\n\
             \x20   bathymetry: sub_bathy.nc\n",
            root = fixture.root.display()
        ))
        .unwrap();
        make_grid_links(&desc, &fixture.run_dir, Some(1)).unwrap();
        assert!(fixture.run_dir.join("1_coordinates.nc").is_symlink());
        assert!(fixture.run_dir.join("1_bathy_meter.nc").is_symlink());
    }

    #[test]
    fn forcing_links_follow_link_to_targets() {
        let fixture = fixture();
        fs::create_dir(fixture.root.join("forcing/atmos")).unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "paths:\n\
             \x20 forcing: {root}/forcing\n\
             forcing:\n\
             \x20 NEMO-atmos:\n\
             \x20   link to: atmos\n",
            root = fixture.root.display()
        ))
        .unwrap();
        make_forcing_links(&desc, &fixture.run_dir).unwrap();
        let target = fs::read_link(fixture.run_dir.join("NEMO-atmos")).unwrap();
        assert!(target.ends_with("forcing/atmos"));
    }

    #[test]
    fn unknown_link_checker_is_fatal() {
        let fixture = fixture();
        fs::create_dir(fixture.root.join("forcing/atmos")).unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "paths:\n\
             \x20 forcing: {root}/forcing\n\
             forcing:\n\
             \x20 NEMO-atmos:\n\
             \x20   link to: atmos\n\
             \x20   check link:\n\
             \x20     type: oceanic\n\
             \x20     namelist filename: namelist_cfg\n",
            root = fixture.root.display()
        ))
        .unwrap();
        let err = make_forcing_links(&desc, &fixture.run_dir).unwrap_err();
        assert!(format!("{err}").contains("unknown forcing link checker: oceanic"));
        assert!(!fixture.run_dir.exists());
    }

    #[test]
    fn absent_restart_section_warns_and_proceeds() {
        let fixture = fixture();
        let desc = RunDesc::from_yaml("run_id: sandbox\n").unwrap();
        make_restart_links(&desc, &fixture.run_dir, false, None).unwrap();
        assert_eq!(fs::read_dir(&fixture.run_dir).unwrap().count(), 0);
    }

    #[test]
    fn restart_links_resolve_declared_sources() {
        let fixture = fixture();
        fs::write(fixture.root.join("restart.nc"), b"").unwrap();
        let desc = RunDesc::from_yaml(&format!(
            "restart:\n\
             \x20 restart.nc: {root}/restart.nc\n",
            root = fixture.root.display()
        ))
        .unwrap();
        make_restart_links(&desc, &fixture.run_dir, false, None).unwrap();
        assert!(fixture.run_dir.join("restart.nc").is_symlink());
    }

    #[test]
    fn nocheck_init_links_to_not_yet_existing_source() {
        let fixture = fixture();
        let desc = RunDesc::from_yaml(&format!(
            "restart:\n\
             \x20 restart.nc: {root}/later/restart.nc\n",
            root = fixture.root.display()
        ))
        .unwrap();
        make_restart_links(&desc, &fixture.run_dir, true, None).unwrap();
        let target = fs::read_link(fixture.run_dir.join("restart.nc")).unwrap();
        assert_eq!(target, fixture.root.join("later/restart.nc"));
    }

    #[test]
    fn missing_restart_source_is_fatal_when_checked() {
        let fixture = fixture();
        let desc = RunDesc::from_yaml(&format!(
            "restart:\n\
             \x20 restart.nc: {root}/absent/restart.nc\n",
            root = fixture.root.display()
        ))
        .unwrap();
        let err = make_restart_links(&desc, &fixture.run_dir, false, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepareError>(),
            Some(PrepareError::Config(_))
        ));
    }

    #[test]
    fn daily_atmos_file_names_embed_the_date() {
        let date = NaiveDate::from_ymd_opt(2002, 1, 2).unwrap();
        assert_eq!(atmos_daily_file_name("u10", date), "u10_y2002m01d02.nc");
    }

    #[test]
    fn atmospheric_check_passes_when_all_daily_files_exist() {
        let fixture = fixture();
        let atmos_dir = fixture.run_dir.join("ATMOS");
        fs::create_dir(&atmos_dir).unwrap();
        let namelist = concat!(
            "&namrun\n",
            "   nn_it000 = 1\n",
            "   nn_itend = 2160\n",
            "   nn_date0 = 20020102\n",
            "/\n",
            "&namdom\n",
            "   rn_rdt = 40.\n",
            "/\n",
            "&namsbc\n",
            "   ln_blk_core = .true.\n",
            "   ln_apr_dyn = .false.\n",
            "/\n",
            "&namsbc_core\n",
            "   cn_dir = './ATMOS/'\n",
            "   sn_wndi = 'u10', 24, 'u10', .true., .false., 'daily', '', ''\n",
            "   sn_wndj = 'v10', 24, 'v10', .true., .false., 'daily', '', ''\n",
            "   sn_qsr = 'qsr', 24, 'qsr', .true., .false., 'yearly', '', ''\n",
            "   sn_qlw = 'qlw', 24, 'qlw', .true., .false., 'yearly', '', ''\n",
            "   sn_tair = 'tair', 24, 'tair', .true., .false., 'yearly', '', ''\n",
            "   sn_humi = 'humi', 24, 'humi', .true., .false., 'yearly', '', ''\n",
            "   sn_prec = 'prec', 24, 'prec', .true., .false., 'yearly', '', ''\n",
            "   sn_snow = 'snow', 24, 'snow', .true., .false., 'yearly', '', ''\n",
            "/\n",
        );
        fs::write(fixture.run_dir.join("namelist_cfg"), namelist).unwrap();
        // 2160 steps of 40 s ≈ 1 day; range covers 2002-01-01 and 2002-01-02.
        for day in ["y2002m01d01", "y2002m01d02"] {
            fs::write(atmos_dir.join(format!("u10_{day}.nc")), b"").unwrap();
            fs::write(atmos_dir.join(format!("v10_{day}.nc")), b"").unwrap();
        }
        for yearly in ["qsr", "qlw", "tair", "humi", "prec", "snow"] {
            fs::write(atmos_dir.join(format!("{yearly}.nc")), b"").unwrap();
        }
        check_atmospheric_forcing_link(
            &fixture.run_dir,
            Path::new("/forcing/atmos"),
            "namelist_cfg",
        )
        .unwrap();
    }

    #[test]
    fn atmospheric_check_names_first_missing_file_and_range() {
        let fixture = fixture();
        fs::create_dir(fixture.run_dir.join("ATMOS")).unwrap();
        let namelist = concat!(
            "&namrun\n",
            "   nn_it000 = 1\n",
            "   nn_itend = 2160\n",
            "   nn_date0 = 20020102\n",
            "/\n",
            "&namdom\n",
            "   rn_rdt = 40.\n",
            "/\n",
            "&namsbc\n",
            "   ln_blk_core = .true.\n",
            "   ln_apr_dyn = .false.\n",
            "/\n",
            "&namsbc_core\n",
            "   cn_dir = './ATMOS/'\n",
            "   sn_wndi = 'u10', 24, 'u10', .true., .false., 'daily', '', ''\n",
            "   sn_wndj = 'v10', 24, 'v10', .true., .false., 'daily', '', ''\n",
            "   sn_qsr = 'qsr', 24, 'qsr', .true., .false., 'yearly', '', ''\n",
            "   sn_qlw = 'qlw', 24, 'qlw', .true., .false., 'yearly', '', ''\n",
            "   sn_tair = 'tair', 24, 'tair', .true., .false., 'yearly', '', ''\n",
            "   sn_humi = 'humi', 24, 'humi', .true., .false., 'yearly', '', ''\n",
            "   sn_prec = 'prec', 24, 'prec', .true., .false., 'yearly', '', ''\n",
            "   sn_snow = 'snow', 24, 'snow', .true., .false., 'yearly', '', ''\n",
            "/\n",
        );
        fs::write(fixture.run_dir.join("namelist_cfg"), namelist).unwrap();
        let err = check_atmospheric_forcing_link(
            &fixture.run_dir,
            Path::new("/forcing/atmos"),
            "namelist_cfg",
        )
        .unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("u10_y2002m01d01.nc not found"));
        assert!(message.contains("2002-01-01 through 2002-01-02"));
    }

    #[test]
    fn atmospheric_check_is_skipped_without_bulk_forcing() {
        let fixture = fixture();
        fs::write(
            fixture.run_dir.join("namelist_cfg"),
            "&namsbc\n   ln_blk_core = .false.\n/\n",
        )
        .unwrap();
        check_atmospheric_forcing_link(
            &fixture.run_dir,
            Path::new("/forcing/atmos"),
            "namelist_cfg",
        )
        .unwrap();
    }
}

//! End-to-end tests of AGRIF sub-grid expansion during preparation.

mod common;

use common::{stderr_text, FixtureOptions, RunSetFixture};
use std::fs;

#[test]
fn consistent_sub_grid_sections_expand_twice() {
    let fixture = RunSetFixture::build(&FixtureOptions {
        agrif_grid_subgrids: Some(2),
        ..FixtureOptions::default()
    });
    let output = fixture.prepare(&[]);
    assert!(output.status.success(), "stderr: {}", stderr_text(&output));

    let run_dirs = fixture.run_dirs();
    assert_eq!(run_dirs.len(), 1);
    let run_dir = &run_dirs[0];
    assert!(run_dir.join("AGRIF_FixedGrids.in").is_file());
    for n in 1..=2 {
        assert!(run_dir.join(format!("{n}_coordinates.nc")).is_symlink());
        assert!(run_dir.join(format!("{n}_bathy_meter.nc")).is_symlink());
        assert!(run_dir.join(format!("{n}_namelist_cfg")).is_file());
        assert!(run_dir.join(format!("{n}_domain_def.xml")).is_file());
        assert!(run_dir.join(format!("{n}_restart.nc")).is_symlink());
    }
    // Sub-grid namelists carry the same decomposition patch as the base.
    let sub_namelist = fs::read_to_string(run_dir.join("2_namelist_cfg")).unwrap();
    assert!(sub_namelist.contains("jpnij = 6"));
}

#[test]
fn sub_grid_count_mismatch_exits_2_and_rolls_back() {
    let fixture = RunSetFixture::build(&FixtureOptions {
        agrif_grid_subgrids: Some(1),
        ..FixtureOptions::default()
    });
    let output = fixture.prepare(&[]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr_text(&output);
    assert!(stderr.contains("Expected 2 AGRIF sub-grids in grid section"));
    assert!(stderr.contains("found 1"));
    assert!(fixture.run_dirs().is_empty());
}

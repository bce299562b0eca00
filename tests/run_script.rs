//! End-to-end tests of the batch script written by `nemo run --no-submit`.

mod common;

use common::{stderr_text, FixtureOptions, RunSetFixture};
use std::fs;

#[test]
fn qsub_script_contains_procs_and_walltime() {
    let fixture = RunSetFixture::build(&FixtureOptions {
        decomposition: "6x7",
        walltime: "01:02:03",
        ..FixtureOptions::default()
    });
    let output = fixture.run_no_submit("qsub");
    assert!(output.status.success(), "stderr: {}", stderr_text(&output));

    let run_dirs = fixture.run_dirs();
    assert_eq!(run_dirs.len(), 1);
    let script = fs::read_to_string(run_dirs[0].join("NEMO.sh")).unwrap();
    // 42 NEMO processors plus 1 XIOS server.
    assert!(script.contains("#PBS -l procs=43\n"));
    assert!(script.contains("#PBS -l walltime=1:02:03\n"));
    assert!(script.contains("mpirun -np 42 ./nemo.exe : -np 1 ./xios_server.exe\n"));
}

#[test]
fn sbatch_script_rounds_nodes_up() {
    let fixture = RunSetFixture::build(&FixtureOptions {
        decomposition: "6x7",
        walltime: "1:24:42",
        ..FixtureOptions::default()
    });
    let output = fixture.run_no_submit("sbatch");
    assert!(output.status.success(), "stderr: {}", stderr_text(&output));

    let run_dirs = fixture.run_dirs();
    let script = fs::read_to_string(run_dirs[0].join("NEMO.sh")).unwrap();
    // 43 total processors at 32 tasks per node.
    assert!(script.contains("#SBATCH --nodes=2\n"));
    assert!(script.contains("#SBATCH --time=1:24:42\n"));
    assert!(script.contains("#SBATCH --output="));
}

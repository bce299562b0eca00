//! CLI argument parsing for the NEMO run workflow.
//!
//! The CLI is intentionally thin: argument structs carry the inputs and
//! the command modules carry the behavior, so the same core logic can be
//! reused elsewhere.
use crate::batch::QueueJobCmd;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint for the run preparation and submission workflow.
#[derive(Parser, Debug)]
#[command(
    name = "nemo",
    version,
    about = "Prepare, submit, and post-process NEMO ocean model runs",
    after_help = "Commands:\n  prepare DESC_FILE            Set up a run directory from a run description\n  run DESC_FILE RESULTS_DIR    Prepare, submit, and gather a NEMO run\n\nExamples:\n  nemo prepare SalishSea.yaml\n  nemo run SalishSea.yaml /results/22dec17 --queue-job-cmd sbatch\n  nemo run SalishSea.yaml /results/22dec17 --no-submit",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level workflow commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Prepare(PrepareArgs),
    Run(RunArgs),
}

/// Prepare command inputs for a single run description.
#[derive(Parser, Debug)]
#[command(about = "Set up the NEMO run described in DESC_FILE and print the run directory path")]
pub struct PrepareArgs {
    /// Run description YAML file
    #[arg(value_name = "DESC_FILE")]
    pub desc_file: PathBuf,

    /// Suppress checking of the initial conditions link; useful when the
    /// submitted job should wait for completion of a previous queued job
    #[arg(long = "nocheck-initial-conditions")]
    pub nocheck_init: bool,

    /// Don't show the run directory path on completion
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run command inputs: prepare, submit, and gather one run.
#[derive(Parser, Debug)]
#[command(
    about = "Prepare, execute, and gather the results from the NEMO run described in DESC_FILE"
)]
pub struct RunArgs {
    /// Run description YAML file
    #[arg(value_name = "DESC_FILE")]
    pub desc_file: PathBuf,

    /// Directory to store results into; created if it does not exist
    #[arg(value_name = "RESULTS_DIR")]
    pub results_dir: PathBuf,

    /// Maximum number of concurrent sub-processes to use for netCDF deflating
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub max_deflate_jobs: u32,

    /// Suppress checking of the initial conditions link; useful when the
    /// submitted job should wait for completion of a previous queued job
    #[arg(long = "nocheck-initial-conditions")]
    pub nocheck_init: bool,

    /// Don't include a deflate command in the bash script; use this with
    /// on-the-fly deflation in XIOS-2
    #[arg(long)]
    pub no_deflate: bool,

    /// Prepare the run directory and bash script but don't submit the run
    /// to the queue
    #[arg(long)]
    pub no_submit: bool,

    /// Make the submitted job wait for completion of the given queue job id
    #[arg(long, value_name = "JOBID", default_value_t = 0)]
    pub waitjob: u64,

    /// Command to use to submit the bash script that executes the run
    #[arg(long, value_enum, default_value = "qsub")]
    pub queue_job_cmd: QueueJobCmd,

    /// Don't show the run directory path or job submission message
    #[arg(short, long)]
    pub quiet: bool,
}

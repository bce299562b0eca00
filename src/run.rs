//! Prepare, submit, and gather the results of a NEMO run.

use crate::batch::{build_batch_script, QueueJobCmd};
use crate::cli::RunArgs;
use crate::prepare::decomposition::n_processors;
use crate::prepare::{prepare, remove_run_dir};
use crate::rundesc::{Req, RunDesc};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Create and populate the run directory, write the batch script to
/// `NEMO.sh` inside it, and submit the script to the queue manager.
///
/// Returns the queue manager's submission message, or `None` when the run
/// was prepared but not submitted (`--no-submit`, or the queue command is
/// not installed on this host).
pub fn run(args: &RunArgs) -> Result<Option<String>> {
    let run_dir = prepare(&args.desc_file, args.nocheck_init)?;
    if !args.quiet {
        tracing::info!("Created run directory {}", run_dir.display());
    }
    let run_desc = RunDesc::load(&args.desc_file)?;
    let nemo_processors = n_processors(&run_desc, Some(&run_dir))?;
    let req = Req::new(&run_desc, Some(&run_dir));
    let separate_xios_server = req
        .value(&["output", "separate XIOS server"])?
        .as_bool()
        .unwrap_or_default();
    let xios_processors = if separate_xios_server {
        req.value(&["output", "XIOS servers"])?
            .as_u64()
            .unwrap_or_default() as u32
    } else {
        0
    };

    let staged = stage_batch_script(args, &run_desc, nemo_processors, xios_processors, &run_dir);
    if let Err(err) = staged {
        remove_run_dir(&run_dir);
        return Err(err);
    }
    if args.no_submit {
        return Ok(None);
    }
    fs::create_dir_all(&args.results_dir)
        .with_context(|| format!("create {}", args.results_dir.display()))?;
    submit(args, &run_dir)
}

fn stage_batch_script(
    args: &RunArgs,
    run_desc: &RunDesc,
    nemo_processors: u32,
    xios_processors: u32,
    run_dir: &Path,
) -> Result<()> {
    let batch_script = build_batch_script(
        run_desc,
        &args.desc_file.to_string_lossy(),
        nemo_processors,
        xios_processors,
        args.no_deflate,
        args.max_deflate_jobs,
        &args.results_dir,
        run_dir,
        args.queue_job_cmd,
    )?;
    let batch_file = run_dir.join("NEMO.sh");
    fs::write(&batch_file, batch_script)
        .with_context(|| format!("write {}", batch_file.display()))?;
    Ok(())
}

/// Submit `NEMO.sh` from inside the run directory. A queue command that
/// is not installed on this host downgrades to a warning, rolls the run
/// directory back, and yields no submission message.
fn submit(args: &RunArgs, run_dir: &Path) -> Result<Option<String>> {
    let queue_cmd = args.queue_job_cmd.command();
    if which::which(queue_cmd).is_err() {
        tracing::error!(
            "{queue_cmd} not found. Please confirm the correct job submission \
             command (qsub or sbatch) for this platform and use the \
             --queue-job-cmd command-line option."
        );
        remove_run_dir(run_dir);
        return Ok(None);
    }
    let cmd = if args.waitjob > 0 {
        let depend_opt = match args.queue_job_cmd {
            QueueJobCmd::Qsub => "-W depend=afterok",
            QueueJobCmd::Sbatch => "-d afterok",
        };
        format!("{queue_cmd} {depend_opt}:{} NEMO.sh", args.waitjob)
    } else {
        format!("{queue_cmd} NEMO.sh")
    };
    let argv = shell_words::split(&cmd).context("split job submission command")?;
    let (program, argv) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty job submission command"))?;
    let output = Command::new(program)
        .args(argv)
        .current_dir(run_dir)
        .output()
        .with_context(|| format!("run {cmd}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{cmd} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(Some(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}

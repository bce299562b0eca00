//! Batch job script generation for the qsub and sbatch queue managers.
//!
//! Pure text templating: the only filesystem effects are whatever the
//! caller does with the returned script.

use crate::rundesc::{Req, RunDesc};
use anyhow::Result;
use serde_yaml::Value;
use std::path::Path;

const DEFAULT_PMEM: &str = "2000mb";
const SBATCH_MAX_TASKS_PER_NODE: u32 = 32;
const SBATCH_MEMORY_PER_NODE: &str = "0";

/// Queue manager submission command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum QueueJobCmd {
    Qsub,
    Sbatch,
}

impl QueueJobCmd {
    pub fn command(self) -> &'static str {
        match self {
            QueueJobCmd::Qsub => "qsub",
            QueueJobCmd::Sbatch => "sbatch",
        }
    }
}

/// Build the bash script that will execute the run.
#[allow(clippy::too_many_arguments)]
pub fn build_batch_script(
    run_desc: &RunDesc,
    desc_file: &str,
    nemo_processors: u32,
    xios_processors: u32,
    no_deflate: bool,
    max_deflate_jobs: u32,
    results_dir: &Path,
    run_dir: &Path,
    queue_job_cmd: QueueJobCmd,
) -> Result<String> {
    let n_processors = nemo_processors + xios_processors;
    let directives = match queue_job_cmd {
        QueueJobCmd::Qsub => pbs_directives(run_desc, n_processors, results_dir)?,
        QueueJobCmd::Sbatch => sbatch_directives(run_desc, n_processors, results_dir)?,
    };
    let mut script = format!("#!/bin/bash\n\n{directives}");
    script = format!(
        "{script}\n{defns}\n",
        defns = definitions(run_desc, desc_file, run_dir, results_dir, queue_job_cmd, no_deflate)?
    );
    if let Ok(modules_to_load) = run_desc.lookup(&["modules to load"]) {
        script = format!("{script}\n{}\n", modules(modules_to_load));
    }
    script = format!(
        "{script}\n{}\n{}\n{}",
        execute(nemo_processors, xios_processors, no_deflate, max_deflate_jobs),
        fix_permissions(),
        cleanup()
    );
    Ok(script)
}

fn pbs_directives(run_desc: &RunDesc, n_processors: u32, results_dir: &Path) -> Result<String> {
    let req = Req::new(run_desc, None);
    let email = req.string(&["email"])?;
    let mut directives = format!(
        "{}\n",
        pbs_common(run_desc, n_processors, &email, results_dir)?
    );
    if let Ok(resources) = run_desc.lookup(&["PBS resources"]) {
        directives.pop();
        directives.push_str("# resource(s) requested in run description YAML file\n");
        let resources = resources.as_sequence().cloned().unwrap_or_default();
        directives.push_str(&format!("{}\n", pbs_resources(&resources, n_processors)));
    }
    Ok(directives)
}

/// Common PBS directives for a TORQUE/PBS multiple-processor run.
pub(crate) fn pbs_common(
    run_desc: &RunDesc,
    n_processors: u32,
    email: &str,
    results_dir: &Path,
) -> Result<String> {
    let req = Req::new(run_desc, None);
    let run_id = req.string(&["run_id"])?;
    let walltime = walltime_hms(run_desc)?;
    let results_dir = results_dir.display();
    Ok(format!(
        "#PBS -N {run_id}\n\
         #PBS -S /bin/bash\n\
         #PBS -l procs={n_processors}\n\
         # memory per processor\n\
         #PBS -l pmem={DEFAULT_PMEM}\n\
         #PBS -l walltime={walltime}\n\
         # email when the job [b]egins and [e]nds, or is [a]borted\n\
         #PBS -m bea\n\
         #PBS -M {email}\n\
         # stdout and stderr file paths/names\n\
         #PBS -o {results_dir}/stdout\n\
         #PBS -e {results_dir}/stderr\n"
    ))
}

/// Extra `#PBS -l` resource requests from the run description, with
/// `nodes=X:ppn=Y` tokens rewritten using the actual processor count.
fn pbs_resources(resources: &[Value], n_processors: u32) -> String {
    let mut directives = String::new();
    for resource in resources {
        let mut resource = resource.as_str().unwrap_or_default().to_string();
        if resource.contains("nodes=") && resource.contains(":ppn=") {
            if let Some((_, ppn)) = resource.rsplit_once('=') {
                if let Ok(ppn) = ppn.parse::<u32>() {
                    let nodes = n_processors.div_ceil(ppn);
                    resource = format!("nodes={nodes}:ppn={ppn}");
                }
            }
        }
        directives.push_str(&format!("#PBS -l {resource}\n"));
    }
    directives
}

/// SBATCH directives for a cluster running the Slurm workload manager.
/// Full nodes are requested (all processors, all memory) so the XIOS
/// servers can run alongside NEMO with plenty of buffer space.
fn sbatch_directives(run_desc: &RunDesc, n_processors: u32, results_dir: &Path) -> Result<String> {
    let req = Req::new(run_desc, None);
    let run_id = req.string(&["run_id"])?;
    let nodes = n_processors.div_ceil(SBATCH_MAX_TASKS_PER_NODE);
    let walltime = walltime_hms(run_desc)?;
    let email = req.string(&["email"])?;
    let mut directives = format!(
        "#SBATCH --job-name={run_id}\n\
         #SBATCH --nodes={nodes}\n\
         #SBATCH --ntasks-per-node={SBATCH_MAX_TASKS_PER_NODE}\n\
         #SBATCH --mem={SBATCH_MEMORY_PER_NODE}\n\
         #SBATCH --time={walltime}\n\
         #SBATCH --mail-user={email}\n\
         #SBATCH --mail-type=ALL\n"
    );
    match run_desc.lookup(&["account"]) {
        Ok(account) => {
            let account = account.as_str().unwrap_or_default();
            directives.push_str(&format!("#SBATCH --account={account}\n"));
        }
        Err(_) => {
            tracing::warn!(
                "No account found in run description YAML file. \
                 If sbatch complains you can add one like account: def-allen"
            );
        }
    }
    let results_dir = results_dir.display();
    directives.push_str(&format!(
        "# stdout and stderr file paths/names\n\
         #SBATCH --output={results_dir}/stdout\n\
         #SBATCH --error={results_dir}/stderr\n"
    ));
    Ok(directives)
}

/// Wall time from the run description as `H:M:S` with zero-padded minutes
/// and seconds. The value is either an integer number of seconds or a
/// pre-formatted `HH:MM:SS` string.
fn walltime_hms(run_desc: &RunDesc) -> Result<String> {
    let req = Req::new(run_desc, None);
    let value = req.value(&["walltime"])?;
    let total_seconds = if let Some(seconds) = value.as_u64() {
        seconds
    } else if let Some(text) = value.as_str() {
        parse_hms_seconds(text).ok_or_else(|| {
            crate::prepare::fatal(
                None,
                format!("cannot parse walltime value \"{text}\" - expected HH:MM:SS"),
            )
        })?
    } else {
        return Err(crate::prepare::fatal(
            None,
            "walltime value must be an integer number of seconds or an \
             HH:MM:SS string"
                .to_string(),
        ));
    };
    Ok(td2hms(total_seconds))
}

fn parse_hms_seconds(text: &str) -> Option<u64> {
    let mut parts = text.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Format a duration in seconds as `H:M:S` with leading zeros on the
/// minutes and seconds values.
fn td2hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

fn definitions(
    run_desc: &RunDesc,
    run_desc_file: &str,
    run_dir: &Path,
    results_dir: &Path,
    queue_job_cmd: QueueJobCmd,
    no_deflate: bool,
) -> Result<String> {
    let req = Req::new(run_desc, None);
    let run_id = req.string(&["run_id"])?;
    let home = match queue_job_cmd {
        QueueJobCmd::Qsub => "${PBS_O_HOME}",
        QueueJobCmd::Sbatch => "${HOME}",
    };
    let nemo_cmd = format!("{home}/.local/bin/nemo");
    let mut defns = format!(
        "RUN_ID=\"{run_id}\"\n\
         RUN_DESC=\"{run_desc_file}\"\n\
         WORK_DIR=\"{run_dir}\"\n\
         RESULTS_DIR=\"{results_dir}\"\n\
         COMBINE=\"{nemo_cmd} combine\"\n",
        run_dir = run_dir.display(),
        results_dir = results_dir.display(),
    );
    if !no_deflate {
        defns.push_str(&format!("DEFLATE=\"{nemo_cmd} deflate\"\n"));
    }
    defns.push_str(&format!("GATHER=\"{nemo_cmd} gather\"\n"));
    Ok(defns)
}

fn modules(modules_to_load: &Value) -> String {
    let mut script = String::new();
    if let Some(modules_to_load) = modules_to_load.as_sequence() {
        for module in modules_to_load {
            if let Some(module) = module.as_str() {
                script.push_str(&format!("module load {module}\n"));
            }
        }
    }
    script
}

fn execute(
    nemo_processors: u32,
    xios_processors: u32,
    no_deflate: bool,
    max_deflate_jobs: u32,
) -> String {
    let mut mpirun = format!("mpirun -np {nemo_processors} ./nemo.exe");
    if xios_processors > 0 {
        mpirun = format!("{mpirun} : -np {xios_processors} ./xios_server.exe");
    }
    let mut script = String::from(
        "mkdir -p ${RESULTS_DIR}\n\
         \n\
         cd ${WORK_DIR}\n\
         echo \"working dir: $(pwd)\"\n\
         \n\
         echo \"Starting run at $(date)\"\n",
    );
    script.push_str(&format!("{mpirun}\n"));
    script.push_str(
        "MPIRUN_EXIT_CODE=$?\n\
         echo \"Ended run at $(date)\"\n\
         \n\
         echo \"Results combining started at $(date)\"\n\
         ${COMBINE} ${RUN_DESC} --debug\n\
         echo \"Results combining ended at $(date)\"\n",
    );
    if !no_deflate {
        script.push_str(&format!(
            "\n\
             echo \"Results deflation started at $(date)\"\n\
             module load nco/4.6.6\n\
             ${{DEFLATE}} *_grid_[TUVW]*.nc *_ptrc_T*.nc \
             --jobs {max_deflate_jobs} --debug\n\
             echo \"Results deflation ended at $(date)\"\n"
        ));
    }
    script.push_str(
        "\n\
         echo \"Results gathering started at $(date)\"\n\
         ${GATHER} ${RESULTS_DIR} --debug\n\
         echo \"Results gathering ended at $(date)\"\n",
    );
    script
}

fn fix_permissions() -> &'static str {
    "chmod go+rx ${RESULTS_DIR}\n\
     chmod g+rw ${RESULTS_DIR}/*\n\
     chmod o+r ${RESULTS_DIR}/*\n"
}

fn cleanup() -> &'static str {
    "echo \"Deleting run directory\" >>${RESULTS_DIR}/stdout\n\
     rmdir $(pwd)\n\
     echo \"Finished at $(date)\" >>${RESULTS_DIR}/stdout\n\
     exit ${MPIRUN_EXIT_CODE}\n"
}

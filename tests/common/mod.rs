//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Knobs for the generated run-set fixture.
pub struct FixtureOptions {
    pub decomposition: &'static str,
    pub walltime: &'static str,
    pub with_restart: bool,
    /// Number of `AGRIF_k` entries declared in the grid section; the
    /// fixed-grids file and the other sections always declare two
    /// sub-grids, so any value other than `Some(2)` is inconsistent.
    pub agrif_grid_subgrids: Option<usize>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            decomposition: "2x3",
            walltime: "01:02:03",
            with_restart: true,
            agrif_grid_subgrids: None,
        }
    }
}

/// A complete on-disk run-set: built model executables, forcing tree,
/// runs root, and a run description YAML file tying them together.
pub struct RunSetFixture {
    pub temp: TempDir,
    pub desc_file: PathBuf,
}

impl RunSetFixture {
    pub fn build(options: &FixtureOptions) -> Self {
        let temp = TempDir::new().expect("create fixture tempdir");
        let root = temp.path();

        let nemo_bin = root.join("code/CONFIG/SandboxSea/BLD/bin");
        let exp00 = root.join("code/CONFIG/SandboxSea/EXP00");
        let rebuild = root.join("code/TOOLS/REBUILD_NEMO");
        let xios_bin = root.join("xios/bin");
        let grid = root.join("forcing/grid");
        let atmos = root.join("forcing/atmos");
        let runs = root.join("runs");
        let runset = root.join("runset");
        for dir in [&nemo_bin, &exp00, &rebuild, &xios_bin, &grid, &atmos, &runs, &runset] {
            fs::create_dir_all(dir).expect("create fixture dir");
        }

        fs::write(nemo_bin.join("nemo.exe"), b"").unwrap();
        fs::write(rebuild.join("rebuild_nemo.exe"), b"").unwrap();
        fs::write(rebuild.join("rebuild_nemo"), b"").unwrap();
        fs::write(xios_bin.join("xios_server.exe"), b"").unwrap();
        fs::write(exp00.join("namelist_ref"), "&namref\n/\n").unwrap();
        fs::write(grid.join("coords.nc"), b"").unwrap();
        fs::write(grid.join("bathy.nc"), b"").unwrap();
        if options.with_restart {
            fs::write(root.join("restart.nc"), b"").unwrap();
        }

        fs::write(
            runset.join("namelist.time"),
            concat!(
                "&namrun\n",
                "   nn_it000 = 1\n",
                "   nn_itend = 2160\n",
                "/\n",
                "&nammpp\n",
                "   jpni = 0\n",
                "   jpnj = 0\n",
                "   jpnij = 0\n",
                "/\n",
            ),
        )
        .unwrap();
        fs::write(
            runset.join("iodef.xml"),
            concat!(
                "<simulation>\n",
                "  <context id=\"xios\">\n",
                "    <variable_definition>\n",
                "      <variable id=\"using_server\" type=\"bool\">false</variable>\n",
                "    </variable_definition>\n",
                "  </context>\n",
                "</simulation>\n",
            ),
        )
        .unwrap();
        fs::write(runset.join("domain_def.xml"), "<domain/>\n").unwrap();
        fs::write(runset.join("field_def.xml"), "<field/>\n").unwrap();

        let agrif = options.agrif_grid_subgrids.is_some();
        if agrif {
            fs::write(
                runset.join("AGRIF_FixedGrids.in"),
                "# sub-grid definitions\n40 70 2 30 3 3 3 43\n30 55 4 60 3 3 3 43\n",
            )
            .unwrap();
            for n in 1..=2 {
                fs::write(grid.join(format!("sub{n}_coords.nc")), b"").unwrap();
                fs::write(grid.join(format!("sub{n}_bathy.nc")), b"").unwrap();
            }
        }

        let mut agrif_top = String::new();
        let mut grid_agrif = String::new();
        let mut namelists_agrif = String::new();
        let mut restart_agrif = String::new();
        let mut output_agrif = String::new();
        if let Some(grid_subgrids) = options.agrif_grid_subgrids {
            agrif_top = format!(
                "AGRIF:\n  fixed grids: {}/AGRIF_FixedGrids.in\n",
                runset.display()
            );
            for n in 1..=grid_subgrids {
                grid_agrif.push_str(&format!(
                    "  AGRIF_{n}:\n    coordinates: sub{n}_coords.nc\n    bathymetry: sub{n}_bathy.nc\n"
                ));
            }
            for n in 1..=2 {
                namelists_agrif.push_str(&format!(
                    "  AGRIF_{n}:\n    namelist_cfg:\n      - namelist.time\n"
                ));
                output_agrif.push_str(&format!(
                    "  AGRIF_{n}:\n    domaindefs: {runset}/domain_def.xml\n",
                    runset = runset.display()
                ));
                if options.with_restart {
                    restart_agrif.push_str(&format!(
                        "  AGRIF_{n}:\n    restart.nc: {root}/restart.nc\n",
                        root = root.display()
                    ));
                }
            }
        }
        let restart_section = if options.with_restart {
            format!(
                "restart:\n  restart.nc: {}/restart.nc\n{restart_agrif}",
                root.display()
            )
        } else {
            String::new()
        };
        let desc_file = runset.join("nemo.yaml");
        fs::write(
            &desc_file,
            format!(
                "config name: SandboxSea\n\
                 run_id: sandbox\n\
                 walltime: \"{walltime}\"\n\
                 email: me@example.com\n\
                 MPI decomposition: {decomposition}\n\
                 {agrif_top}\
                 paths:\n\
                 \x20 NEMO code config: {root}/code/CONFIG\n\
                 \x20 XIOS: {root}/xios\n\
                 \x20 runs directory: {root}/runs\n\
                 \x20 forcing: {root}/forcing\n\
                 grid:\n\
                 \x20 coordinates: coords.nc\n\
                 \x20 bathymetry: bathy.nc\n\
                 {grid_agrif}\
                 forcing:\n\
                 \x20 NEMO-atmos:\n\
                 \x20   link to: atmos\n\
                 {restart_section}\
                 namelists:\n\
                 \x20 namelist_cfg:\n\
                 \x20   - namelist.time\n\
                 {namelists_agrif}\
                 output:\n\
                 \x20 iodefs: {runset}/iodef.xml\n\
                 \x20 domaindefs: {runset}/domain_def.xml\n\
                 \x20 fielddefs: {runset}/field_def.xml\n\
                 \x20 separate XIOS server: true\n\
                 \x20 XIOS servers: 1\n\
                 {output_agrif}",
                walltime = options.walltime,
                decomposition = options.decomposition,
                root = root.display(),
                runset = runset.display(),
            ),
        )
        .unwrap();

        Self { temp, desc_file }
    }

    pub fn prepare(&self, extra_args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_nemo"));
        cmd.arg("prepare").arg(&self.desc_file).args(extra_args);
        cmd.output().expect("run nemo prepare")
    }

    pub fn run_no_submit(&self, queue_job_cmd: &str) -> Output {
        let results_dir = self.temp.path().join("results");
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_nemo"));
        cmd.arg("run")
            .arg(&self.desc_file)
            .arg(&results_dir)
            .arg("--no-submit")
            .arg("--queue-job-cmd")
            .arg(queue_job_cmd);
        cmd.output().expect("run nemo run")
    }

    /// Run directories created under the fixture's runs root.
    pub fn run_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(self.temp.path().join("runs"))
            .expect("read runs dir")
            .map(|entry| entry.expect("read runs dir entry").path())
            .collect();
        dirs.sort();
        dirs
    }
}

pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

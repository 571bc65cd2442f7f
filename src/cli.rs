use clap::Parser;
use std::path::PathBuf;

use casc_route::config::{
    ConvergencePolicy, InitialCondition, OutletBoundary, OutputFormat, RunConfig,
};

/// Implicit St. Venant routing over a branching channel network
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Channel network file
    pub channel_file: PathBuf,

    /// Breakpoint cross-section tables (needed by type 8 links)
    #[arg(long)]
    pub tables: Option<PathBuf>,

    /// Headwater hydrographs as `link time discharge` lines
    #[arg(long)]
    pub inflow: Option<PathBuf>,

    /// Constant lateral inflow as `link node discharge` lines
    #[arg(long, conflicts_with = "drain")]
    pub lateral: Option<PathBuf>,

    /// Outlet water-surface series as `time elevation` lines
    #[arg(long)]
    pub stage_target: Option<PathBuf>,

    /// Pure drainage run: no lateral inflow, stage target at the outlet
    #[arg(long, requires = "stage_target")]
    pub drain: bool,

    /// Start from a standard-step backwater profile
    #[arg(long, requires = "drain", conflicts_with = "stage_profile")]
    pub backwater: bool,

    /// Cold-start stage profile (depth, or lake elevation)
    #[arg(long, requires = "discharge_profile")]
    pub stage_profile: Option<PathBuf>,

    /// Cold-start discharge profile
    #[arg(long, requires = "stage_profile")]
    pub discharge_profile: Option<PathBuf>,

    /// Write the final stage profile here at the end of a drain run
    #[arg(long, requires_all = ["drain", "write_discharge"])]
    pub write_stage: Option<PathBuf>,

    /// Write the final discharge profile here at the end of a drain run
    #[arg(long, requires_all = ["drain", "write_stage"])]
    pub write_discharge: Option<PathBuf>,

    /// Overland model time step in seconds; defaults to the channel time step
    #[arg(long)]
    pub overland_dt: Option<f64>,

    /// Number of time steps; defaults to tt / delt from the network file
    #[arg(long)]
    pub steps: Option<usize>,

    /// Newton iterations per time step
    #[arg(long, default_value_t = 2)]
    pub max_iterations: usize,

    /// Stop iterating once every correction is below this
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// CSV results file
    #[arg(short, long, default_value = "channel_results.csv")]
    pub output: PathBuf,

    /// NetCDF results file (needs the `netcdf` feature)
    #[arg(long)]
    pub netcdf: Option<PathBuf>,

    /// Skip the CSV results and write only the NetCDF file
    #[arg(long, requires = "netcdf")]
    pub no_csv: bool,

    /// Record results every this many steps
    #[arg(long, default_value_t = 1)]
    pub output_interval: usize,

    /// Simulation start time
    #[arg(long, default_value = "2000-01-01 00:00:00")]
    pub start: String,

    /// Worker threads for the section pass; defaults to the number of CPUs
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn run_config(&self) -> RunConfig {
        let initial = match (&self.stage_profile, &self.discharge_profile) {
            (Some(stage), Some(discharge)) => InitialCondition::Profiles {
                stage: stage.clone(),
                discharge: discharge.clone(),
            },
            _ if self.backwater => InitialCondition::Backwater,
            _ => InitialCondition::NormalDepth,
        };
        RunConfig {
            drain: self.drain,
            initial,
            outlet: if self.drain {
                OutletBoundary::StageTarget
            } else {
                OutletBoundary::NormalDepth
            },
            convergence: ConvergencePolicy {
                max_iterations: self.max_iterations,
                residual_tolerance: self.tolerance,
            },
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match (self.netcdf.is_some(), self.no_csv) {
            (false, _) => OutputFormat::Csv,
            (true, false) => OutputFormat::Both,
            (true, true) => OutputFormat::NetCdf,
        }
    }
}

pub fn get_args() -> Args {
    Args::parse()
}

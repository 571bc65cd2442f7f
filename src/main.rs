use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveDateTime};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;

use casc_route::boundary::Boundaries;
use casc_route::config::OutputFormat;
use casc_route::io::csv::{create_csv_writer, write_state};
use casc_route::io::network_file::read_network;
use casc_route::io::profile::write_profiles;
use casc_route::io::results::SimulationResults;
use casc_route::io::series::{read_lateral, read_link_series, read_series};
use casc_route::io::table_file::{TableSet, read_tables};
use casc_route::simulation::Simulation;
use cli::get_args;

fn main() -> Result<()> {
    let args = get_args();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let threads = args.threads.unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to start the worker pool")?;

    let reference_time = NaiveDateTime::parse_from_str(&args.start, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Failed to parse start time: {}", args.start))?;

    // Inputs
    let tables = match &args.tables {
        Some(path) => read_tables(path)
            .with_context(|| format!("Failed to read breakpoint tables: {:?}", path))?,
        None => TableSet::new(),
    };
    let network = read_network(&args.channel_file, &tables)
        .with_context(|| format!("Failed to read channel network: {:?}", args.channel_file))?;

    let mut boundaries = Boundaries::constant(network.params.qmin);
    if let Some(path) = &args.inflow {
        let series = read_link_series(path)
            .with_context(|| format!("Failed to read inflow hydrographs: {:?}", path))?;
        for (id, hydrograph) in series {
            let Some(idx) = network.link_index(id) else {
                bail!("Inflow hydrograph given for unknown link {}", id);
            };
            if !network.links[idx].depend.is_empty() {
                warn!("Link {} is not a headwater link; its hydrograph is ignored", id);
            }
            boundaries.inflows.insert(idx, hydrograph);
        }
    }
    if let Some(path) = &args.stage_target {
        boundaries.stage_target = Some(
            read_series(path)
                .with_context(|| format!("Failed to read stage target: {:?}", path))?,
        );
    }
    let lateral = match &args.lateral {
        Some(path) => Some(
            read_lateral(&network, path)
                .with_context(|| format!("Failed to read lateral inflow: {:?}", path))?,
        ),
        None => None,
    };

    let params = network.params.clone();
    let config = args.run_config();
    let overland_dt = args.overland_dt.unwrap_or(params.delt);
    let mut sim = Simulation::new(network, boundaries, config, overland_dt)
        .context("Failed to initialise the channel state")?;
    if let Some(qlat) = lateral {
        sim.state_mut().qlat = qlat;
    }

    let steps = args.steps.unwrap_or_else(|| params.step_count());
    let interval = args.output_interval.max(1);
    let end_time =
        reference_time + Duration::milliseconds((steps as f64 * params.delt * 1000.0) as i64);

    info!("Simulation configuration:");
    info!("  Period: {} to {}", reference_time, end_time);
    info!("  Channel timestep: {} seconds", params.delt);
    info!("  Links: {}, nodes: {}", sim.network().links.len(), sim.network().nodes.len());
    info!("  Total timesteps: {}", steps);
    info!("  Worker threads: {}", threads);

    let output_format = args.output_format();
    if args.netcdf.is_some() && !cfg!(feature = "netcdf") {
        bail!("NetCDF output requested but this build has no `netcdf` feature");
    }
    let mut csv_writer = if matches!(output_format, OutputFormat::Csv | OutputFormat::Both) {
        Some(
            create_csv_writer(&args.output)
                .with_context(|| format!("Failed to create {:?}", args.output))?,
        )
    } else {
        None
    };
    let mut results = SimulationResults::new(sim.network());

    let pb = ProgressBar::new(steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut warnings = 0;
    for step in 1..=steps {
        let report = sim
            .step()
            .with_context(|| format!("Channel solve failed at step {}", step))?;
        warnings += report.warnings().count();
        pb.inc(1);

        if step % interval == 0 {
            let seconds = sim.time();
            results.record(seconds, sim.network(), sim.state());
            if let Some(wtr) = csv_writer.as_mut() {
                let stamp =
                    reference_time + Duration::milliseconds((seconds * 1000.0).round() as i64);
                write_state(
                    wtr,
                    &stamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    seconds,
                    sim.network(),
                    sim.state(),
                )
                .context("Failed to write CSV results")?;
            }
        }
    }
    pb.finish_with_message("done");

    if warnings > 0 {
        warn!("{} solver warnings during the run", warnings);
    }
    sim.report_mass_balance();

    if let Some(mut wtr) = csv_writer {
        wtr.flush().context("Failed to flush CSV writer")?;
        info!("CSV results saved to {:?}", args.output);
    }

    if let (Some(stage), Some(discharge)) = (&args.write_stage, &args.write_discharge) {
        write_profiles(sim.network(), sim.state(), stage, discharge)
            .context("Failed to write final profiles")?;
    }

    if let Some(path) = &args.netcdf {
        write_netcdf(path, &results, &reference_time)?;
    }

    for idx in sim.network().outlets() {
        let id = sim.network().links[idx].id;
        if let Some((seconds, peak)) = results.peak_discharge(sim.network(), id) {
            info!("Outlet link {}: peak discharge {:.3} m3/s at {} s", id, peak, seconds);
        }
    }

    Ok(())
}

#[cfg(feature = "netcdf")]
fn write_netcdf(
    path: &std::path::Path,
    results: &SimulationResults,
    reference_time: &NaiveDateTime,
) -> Result<()> {
    casc_route::io::netcdf::write_netcdf_output(path, results, reference_time)
        .map_err(|e| anyhow::anyhow!("Failed to write NetCDF output {:?}: {}", path, e))?;
    info!("NetCDF results saved to {:?}", path);
    Ok(())
}

#[cfg(not(feature = "netcdf"))]
fn write_netcdf(
    path: &std::path::Path,
    _results: &SimulationResults,
    _reference_time: &NaiveDateTime,
) -> Result<()> {
    bail!("Cannot write {:?}: built without the `netcdf` feature", path)
}

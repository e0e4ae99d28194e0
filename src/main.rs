//! flownet-sim entry point: CLI wiring, logging setup and run reporting.

use std::process;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use flownet_sim::cli::{self, CliOptions};
use flownet_sim::config::ScenarioConfig;
use flownet_sim::io::CsvPublisher;
use flownet_sim::observation::{FanOut, MemoryPublisher, Publisher};
use flownet_sim::report::RunReport;
use flownet_sim::simulation::Simulation;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `--scenario` takes priority, then `--preset` (the CLI fills in a default).
fn load_scenario(opts: &CliOptions) -> Result<ScenarioConfig, String> {
    let mut scenario = match (&opts.scenario, &opts.preset) {
        (Some(path), _) => ScenarioConfig::from_toml_file(path),
        (None, Some(name)) => ScenarioConfig::from_preset(name),
        (None, None) => ScenarioConfig::from_preset(cli::DEFAULT_PRESET),
    }
    .map_err(|e| e.to_string())?;

    if let Some(workers) = opts.workers {
        scenario.simulation.workers = workers;
    }
    let errors = scenario.validate();
    if !errors.is_empty() {
        let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(lines.join("\n"));
    }
    Ok(scenario)
}

fn build_publisher(opts: &CliOptions, memory: &Arc<MemoryPublisher>) -> Result<Arc<dyn Publisher>, String> {
    let mut fan = FanOut::new().with(Arc::clone(memory) as Arc<dyn Publisher>);
    if let Some(path) = &opts.out {
        let csv = CsvPublisher::create(path)
            .map_err(|e| format!("cannot write \"{}\": {e}", path.display()))?;
        fan = fan.with(Arc::new(csv));
    }
    Ok(Arc::new(fan))
}

fn run_and_report(sim: &Simulation, memory: &MemoryPublisher) -> bool {
    let outcome = sim.run();
    let report = RunReport::from_records(sim.networks(), &memory.records());
    println!("{report}");
    match outcome {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "run failed");
            false
        }
    }
}

fn main() {
    init_tracing();

    let opts = cli::parse_args().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        cli::print_usage();
        process::exit(2);
    });
    let scenario = load_scenario(&opts).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let memory = Arc::new(MemoryPublisher::new());
    let publisher = build_publisher(&opts, &memory).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });
    let sim = Simulation::from_config(&scenario, publisher, None).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });
    for network in sim.networks() {
        info!(
            network = %network.id,
            carrier = %network.carrier,
            rank = network.rank,
            devices = network.device_count,
            transport = network.has_transport,
            "network ready"
        );
    }

    if opts.serve {
        serve(sim, memory, opts.port);
        return;
    }
    if !run_and_report(&sim, &memory) {
        process::exit(1);
    }
    if let Some(path) = &opts.out {
        eprintln!("Observations written to {}", path.display());
    }
}

/// Runs the simulation on a background thread while serving its status.
#[cfg(feature = "api")]
fn serve(sim: Simulation, memory: Arc<MemoryPublisher>, port: u16) {
    use std::net::SocketAddr;

    use flownet_sim::api::{self, AppState};

    let state = Arc::new(AppState {
        status: Arc::clone(sim.status()),
        networks: sim.networks().to_vec(),
    });
    let worker = std::thread::Builder::new()
        .name("flownet-run".to_string())
        .spawn(move || run_and_report(&sim, &memory));
    if let Err(e) = worker {
        eprintln!("error: failed to start the simulation thread: {e}");
        process::exit(1);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    if let Err(e) = rt.block_on(api::serve(state, addr)) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

#[cfg(not(feature = "api"))]
fn serve(sim: Simulation, memory: Arc<MemoryPublisher>, _port: u16) {
    tracing::warn!("built without the `api` feature, running without the status API");
    if !run_and_report(&sim, &memory) {
        process::exit(1);
    }
}

//! Swarm Simulator CLI
//!
//! Runs the simulation loop with a demonstration mission, scripted
//! experiments in simulated time, or offline planner validation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use swarm_domain::{FormationParams, VehicleStatus};
use swarm_persistence::{BackgroundSink, InMemorySink, SharedSink};
use swarm_simulator::planner::validate_cases;
use swarm_simulator::{
    Engine, ExperimentPlan, Scenario, SharedBackend, SimConfig, TrajectoryPlanner, VERSION,
    ValidationCase, build_backend, run_experiment,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "swarm-sim")]
#[command(about = "Simulate a swarm of small aerial vehicles", version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the simulation loop with a demonstration mission
    Serve {
        /// Number of vehicles
        #[arg(short, long, default_value = "4")]
        drones: usize,

        /// Formation flown after takeoff
        #[arg(short, long, default_value = "circle")]
        formation: String,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Run a scripted scenario in simulated time and print its report
    Experiment {
        /// circular-formation, figure-eight or takeoff-hover-land
        #[arg(short, long, default_value = "takeoff-hover-land")]
        scenario: String,

        /// Number of vehicles
        #[arg(short, long, default_value = "3")]
        drones: usize,

        /// Scenario phase length in simulated seconds
        #[arg(long, default_value = "10")]
        duration: f64,

        /// Write the run's samples to a .json or .csv file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Plan a batch of start/goal cases and report path quality as JSON
    Validate {
        /// JSON array of cases
        #[arg(long)]
        cases: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = SimConfig::from_env()?;
    init_tracing(&config);

    info!(version = VERSION, backend = %config.backend, "Starting swarm simulator");

    match args.command {
        Commands::Serve {
            drones,
            formation,
            seconds,
        } => serve(config, drones, &formation, seconds).await,
        Commands::Experiment {
            scenario,
            drones,
            duration,
            export,
        } => experiment(config, &scenario, drones, duration, export),
        Commands::Validate { cases } => validate(&config, &cases).await,
    }
}

fn init_tracing(config: &SimConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,swarm_simulator={0},swarm_persistence={0}",
            config.log_level
        ))
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(config: SimConfig, drones: usize, formation: &str, seconds: Option<u64>) -> Result<()> {
    let store: SharedSink = Arc::new(InMemorySink::new());
    let (sink, _writer) = BackgroundSink::spawn(store);
    let warmup = Duration::from_secs_f64(3.0 / config.speed_multiplier);
    let (backend, loop_handle) = build_backend(config, Arc::new(sink.clone()))?;

    let run_id = demo_mission(&backend, drones, formation, warmup).await?;

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = status.tick() => log_status(&backend).await,
            () = &mut deadline => {
                info!("Demonstration time elapsed");
                break;
            }
            () = &mut shutdown => break,
        }
    }

    backend.shutdown().await;
    loop_handle.await?;
    sink.flush().await?;
    let samples = backend.logs(&run_id).await.map(|s| s.len()).unwrap_or_default();
    info!(run_id = %run_id, samples, "Simulator shut down gracefully");
    Ok(())
}

/// Create the swarm, take off and arrange it.
async fn demo_mission(
    backend: &SharedBackend,
    drones: usize,
    formation: &str,
    warmup: Duration,
) -> Result<swarm_domain::RunId> {
    let (run_id, ids) = backend.create_swarm(drones).await?;
    info!(run_id = %run_id, vehicles = ids.len(), "Swarm created");

    for id in &ids {
        backend.takeoff(id, 0.6, 2.0).await?;
    }
    tokio::time::sleep(warmup).await;

    let params = FormationParams {
        radius: 0.8,
        ..FormationParams::default()
    };
    match backend.set_formation(formation, params).await {
        Ok(_) => info!(formation, "Formation assigned"),
        Err(err) => warn!(formation, code = err.error_code(), error = %err, "Formation rejected"),
    }
    Ok(run_id)
}

async fn log_status(backend: &SharedBackend) {
    let states = backend.states().await;
    let count = |status: VehicleStatus| states.iter().filter(|s| s.status == status).count();
    let min_battery = states.iter().map(|s| s.battery).reduce(f64::min);
    info!(
        vehicles = states.len(),
        flying = count(VehicleStatus::Flying),
        going_to = count(VehicleStatus::GoingTo),
        error = count(VehicleStatus::Error),
        min_battery = min_battery.unwrap_or_default(),
        "Swarm status"
    );
}

fn experiment(
    config: SimConfig,
    scenario: &str,
    drones: usize,
    duration: f64,
    export: Option<PathBuf>,
) -> Result<()> {
    let plan = ExperimentPlan {
        scenario: scenario.parse::<Scenario>()?,
        num_vehicles: drones,
        duration_s: duration,
    };
    let mut engine = Engine::in_memory(config)?;
    let report = run_experiment(&mut engine, &plan)?;

    if let Some(path) = export {
        let samples = engine.query(&report.run_id)?;
        let format = swarm_persistence::export::write_file(&path, &samples)?;
        info!(path = %path.display(), ?format, samples = samples.len(), "Samples exported");
    }
    if !report.success {
        warn!(rejected = ?report.rejected_commands, "Experiment did not succeed");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn validate(config: &SimConfig, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let cases: Vec<ValidationCase> = serde_json::from_str(&raw)?;
    let planner = TrajectoryPlanner::new(config.planner_safety_radius);

    let report = validate_cases(&planner, &cases);
    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "Planner validation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

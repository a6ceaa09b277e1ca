mod abort;
mod beamformer;
mod config;
mod executor;
mod interpolate;
mod plan;
mod raster;
mod scanner;
mod storage;
mod transport;

use clap::{Parser, Subcommand};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use crate::beamformer::{BeamformerAdapter, Device};
use crate::config::Config;
use crate::plan::{Plan, Runner};
use crate::raster::Raster;
use crate::scanner::Scanner;
use crate::storage::SessionStore;
use crate::transport::UdpTransport;

#[derive(Parser)]
#[command(name = "beamscan")]
#[command(about = "Phased-array beamscan acquisition and spatial spectrum estimation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plan file
    Validate { plan: String },
    /// Execute a plan file
    Run {
        plan: String,
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one raster pass and save the session
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        /// Fit and save a spatial model after the pass
        #[arg(long)]
        fit: bool,
    },
    /// Fit a spatial model from a saved session file
    Fit {
        session: PathBuf,
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a summary of a saved session file
    Show { session: PathBuf },
    /// Print a summary of the saved model for a session
    Model {
        session_id: String,
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List saved sessions
    Sessions {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plan } => validate(&plan),
        Commands::Run { plan, config } => run(&plan, &config).await,
        Commands::Scan { config, fit } => scan(&config, fit).await,
        Commands::Fit { session, config } => fit(&session, &config).await,
        Commands::Show { session } => show(&session),
        Commands::Model { session_id, config } => model(&session_id, &config),
        Commands::Sessions { config } => sessions(&config),
    }
}

fn validate(path: &str) -> ExitCode {
    let Some(plan) = load_plan(path) else {
        return ExitCode::FAILURE;
    };
    println!(
        "Plan is valid ({} steps, {} variables)",
        plan.steps.len(),
        plan.variables.len()
    );
    for (i, step) in plan.steps.iter().enumerate() {
        let time_str = match &step.time {
            Some(t) => format!("T+{}", humantime::format_duration(*t)),
            None => "immediate".to_string(),
        };
        println!("  {}: {} @ {}", i + 1, step.command.name(), time_str);
    }
    ExitCode::SUCCESS
}

async fn run(path: &str, config_path: &Path) -> ExitCode {
    let Some(plan) = load_plan(path) else {
        return ExitCode::FAILURE;
    };
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let Some(scanner) = open_scanner(&config).await else {
        return ExitCode::FAILURE;
    };

    let runner = Runner::new(
        plan,
        scanner,
        SessionStore::new(config.storage.base_folder.clone()),
        config.raster.clone(),
        config.interpolation.clone(),
        cancel_on_ctrl_c(),
    );
    match runner.run().await {
        Ok(log) => {
            println!("Plan run {} finished: {:?}", log.run_id, log.state);
            for result in &log.step_results {
                let outcome = match (&result.error, &result.output) {
                    (Some(e), _) => format!("failed: {}", e),
                    (None, Some(output)) => format!("ok, {}", output),
                    (None, None) => "ok".to_string(),
                };
                println!("  {}: {} {}", result.step_index + 1, result.command_type, outcome);
            }
            if log.state == storage::RunState::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Run error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn scan(config_path: &Path, fit: bool) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let Some(mut scanner) = open_scanner(&config).await else {
        return ExitCode::FAILURE;
    };
    let store = SessionStore::new(config.storage.base_folder.clone());

    let raster = match Raster::new(&config.raster) {
        Ok(raster) => raster,
        Err(e) => {
            eprintln!("Invalid raster: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let cancel = cancel_on_ctrl_c();
    let session = scanner.run(raster, &cancel).await;
    scanner.park();
    if let Err(e) = store.save_session(&session) {
        eprintln!("Failed to save session: {}", e);
        return ExitCode::FAILURE;
    }
    println!(
        "Session {} {}: {} samples, {} without response",
        session.session_id,
        session.state.label(),
        session.samples.len(),
        session.absent_count()
    );

    if fit && !fit_and_save(session, &config, &store).await {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn fit(session_path: &Path, config_path: &Path) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let session = match SessionStore::load_session_file(session_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading session: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let store = SessionStore::new(config.storage.base_folder.clone());
    if fit_and_save(session, &config, &store).await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn show(session_path: &Path) -> ExitCode {
    let session = match SessionStore::load_session_file(session_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading session: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Session {}", session.session_id);
    println!("  state:    {}", session.state.label());
    if let scanner::ScanState::Aborted { reason } = &session.state {
        println!("  reason:   {}", reason);
    }
    println!("  started:  {}", session.started_at);
    if let Some(duration) = session.duration() {
        println!("  duration: {:.3}s", duration.num_milliseconds() as f64 / 1000.0);
    }
    println!("  beams:    {}", session.beam_count());
    println!(
        "  samples:  {} ({} without response)",
        session.samples.len(),
        session.absent_count()
    );
    let magnitudes: Vec<f64> = session.received().filter_map(|s| s.magnitude).collect();
    if !magnitudes.is_empty() {
        let min = magnitudes.iter().copied().fold(f64::INFINITY, f64::min);
        let max = magnitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("  magnitude: {:.4} .. {:.4}", min, max);
    }
    ExitCode::SUCCESS
}

fn model(session_id: &str, config_path: &Path) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let model = match SessionStore::new(config.storage.base_folder).load_model(session_id) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error reading model: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let range = &config.interpolation.render_range;
    let resolution = model.resolution();
    println!("Model for {}", model.session_id);
    println!("  kernel:   {}", model.kernel);
    println!("  log-likelihood: {:.3}", model.log_marginal_likelihood);
    println!("  R²:       {:.4}", model.score);
    println!("  training: {} samples", model.training_inputs.len());
    println!("  grid:     {} x {}", resolution, resolution);
    println!(
        "  outside [{}, {}]: {} cells",
        range.min,
        range.max,
        model.flag_out_of_range(range)
    );
    let clipped = model.clipped(range);
    println!("  rendered: {:.4} .. {:.4}", clipped.min(), clipped.max());
    ExitCode::SUCCESS
}

fn sessions(config_path: &Path) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    match SessionStore::new(config.storage.base_folder).list_sessions() {
        Ok(entries) => {
            for entry in entries {
                println!(
                    "{}  {:<9}  {} samples ({} absent)",
                    entry.id, entry.state, entry.samples, entry.absent
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error listing sessions: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn fit_and_save(session: scanner::ScanSession, config: &Config, store: &SessionStore) -> bool {
    match plan::fit_blocking(session, config.interpolation.clone()).await {
        Ok(model) => {
            println!(
                "Model for {}: {} (R² {:.4})",
                model.session_id, model.kernel, model.score
            );
            match store.save_model(&model) {
                Ok(path) => {
                    println!("Saved to {}", path.display());
                    true
                }
                Err(e) => {
                    eprintln!("Failed to save model: {}", e);
                    false
                }
            }
        }
        Err(e) => {
            eprintln!("Fit error: {}", e);
            false
        }
    }
}

fn load_plan(path: &str) -> Option<Plan> {
    let yaml = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            return None;
        }
    };
    match Plan::from_str(&yaml) {
        Ok(plan) => Some(plan),
        Err(e) => {
            eprintln!("Parse error: {}", e);
            None
        }
    }
}

fn load_config(path: &Path) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Config error ({}): {}", path.display(), e);
            None
        }
    }
}

async fn open_scanner(config: &Config) -> Option<Scanner<Device, UdpTransport>> {
    let adapter = match Device::from_config(&config.beamformer).and_then(BeamformerAdapter::setup) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Beamformer setup failed: {}", e);
            return None;
        }
    };
    let transport = match UdpTransport::bind(&config.transport).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Transport setup failed: {}", e);
            return None;
        }
    };
    match transport.rx_addr() {
        Ok(addr) => info!("Listening for CSI on {}", addr),
        Err(e) => error!("Transport has no local address: {}", e),
    }
    Some(Scanner::new(adapter, transport, config.acquisition.clone()))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current beam");
            token.cancel();
        }
    });
    cancel
}

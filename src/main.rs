//! Model router command line.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                ModelServiceRegistry                  │
//!   select_instance  │                                                      │
//!   ─────────────────┼─▶ RoutingTable ─▶ health ─▶ breakers ─▶ limiters ─┐ │
//!                    │   (ArcSwap)      oracle    (per inst)  (glob/svc)  │ │
//!                    │                                                    ▼ │
//!   instance         │                       instance limiter ◀─ balancer   │
//!   ◀────────────────┼──────────────────────────────┘                       │
//!                    │                                                      │
//!   record_call_*  ──┼─▶ balancer on_call_end ─▶ breaker on_success/failure │
//!                    │                                                      │
//!                    │  ┌────────────────────────────────────────────────┐  │
//!                    │  │ config watcher │ orphan sweeper │ metrics sink │  │
//!                    │  └────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Commands
//! - `check`: load and validate a config file
//! - `simulate`: drive concurrent dispatches against a config and report JSON
//! - `run`: host the registry with hot reload, sweeps, and a metrics endpoint

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use model_router::config::loader::load_config;
use model_router::config::ConfigError;
use model_router::health::HealthStateStore;
use model_router::lifecycle::{signals, spawn_background, Shutdown};
use model_router::observability::{logging, metrics};
use model_router::rate_limit::LimiterSnapshot;
use model_router::resilience::BreakerSnapshot;
use model_router::{ModelServiceRegistry, ServiceType};

#[derive(Parser)]
#[command(name = "model-router")]
#[command(about = "Dispatch core of an AI model routing gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Drive concurrent dispatches and print a JSON report
    Simulate {
        #[arg(short, long)]
        config: PathBuf,

        /// Service type (chat, embedding, rerank, tts, stt, img-gen, img-edit)
        #[arg(short, long)]
        service: ServiceType,

        #[arg(short, long)]
        model: String,

        #[arg(short = 'n', long, default_value_t = 1000)]
        requests: usize,

        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Number of distinct synthetic client keys (0 = no client key)
        #[arg(long, default_value_t = 0)]
        clients: usize,

        /// Probability that a dispatched call is reported as failed
        #[arg(long, default_value_t = 0.0)]
        fail_rate: f64,

        /// Instance ids (`name@base_url`) to report unhealthy
        #[arg(long)]
        unhealthy: Vec<String>,

        /// Append the Prometheus text exposition to the report
        #[arg(long)]
        print_metrics: bool,
    },
    /// Host the registry until SIGINT/SIGTERM
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    requests: usize,
    selected: BTreeMap<String, usize>,
    rejected: BTreeMap<String, usize>,
    reported_failures: usize,
    breakers: Vec<BreakerSnapshot>,
    limiters: Vec<LimiterSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<String>,
}

#[derive(Default)]
struct WorkerTally {
    selected: HashMap<String, usize>,
    rejected: HashMap<String, usize>,
    failures: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(config),
        Commands::Simulate {
            config,
            service,
            model,
            requests,
            concurrency,
            clients,
            fail_rate,
            unhealthy,
            print_metrics,
        } => {
            let options = SimulateOptions {
                service,
                model,
                requests,
                concurrency: concurrency.max(1),
                clients,
                fail_rate: fail_rate.clamp(0.0, 1.0),
                unhealthy,
                print_metrics,
            };
            simulate(config, options).await
        }
        Commands::Run { config } => run(config).await,
    }
}

fn check(path: PathBuf) -> Result<(), Box<dyn Error>> {
    match load_config(&path) {
        Ok(config) => {
            println!(
                "{}: ok ({} services, {} instances)",
                path.display(),
                config.services.len(),
                config.services.values().map(|s| s.instances.len()).sum::<usize>()
            );
            Ok(())
        }
        Err(ConfigError::Validation(errors)) => {
            for error in &errors {
                eprintln!("{}: {}", path.display(), error);
            }
            Err(ConfigError::Validation(errors).into())
        }
        Err(e) => Err(e.into()),
    }
}

struct SimulateOptions {
    service: ServiceType,
    model: String,
    requests: usize,
    concurrency: usize,
    clients: usize,
    fail_rate: f64,
    unhealthy: Vec<String>,
    print_metrics: bool,
}

async fn simulate(path: PathBuf, options: SimulateOptions) -> Result<(), Box<dyn Error>> {
    let config = load_config(&path)?;
    let _ = logging::init_logging(&config.observability);
    let handle = if options.print_metrics {
        Some(metrics::init_recorder()?)
    } else {
        None
    };

    let health = Arc::new(HealthStateStore::new());
    let registry = Arc::new(ModelServiceRegistry::new(&config, health.clone()));
    for instance in registry.all_instances(options.service) {
        if options.unhealthy.contains(&instance.instance_id()) {
            health.set_healthy(options.service, &instance, false);
        }
    }

    let options = Arc::new(options);
    let mut workers = Vec::with_capacity(options.concurrency);
    for worker in 0..options.concurrency {
        let registry = registry.clone();
        let options = options.clone();
        workers.push(tokio::spawn(async move {
            let mut tally = WorkerTally::default();
            for i in (worker..options.requests).step_by(options.concurrency) {
                let client_key = (options.clients > 0).then(|| format!("client-{}", i % options.clients));
                match registry.select_instance(options.service, &options.model, client_key.as_deref()) {
                    Ok(instance) => {
                        *tally.selected.entry(instance.instance_id()).or_default() += 1;
                        tokio::task::yield_now().await;
                        if fastrand::f64() < options.fail_rate {
                            tally.failures += 1;
                            registry.record_call_failure(options.service, &instance);
                        } else {
                            registry.record_call_complete(options.service, &instance);
                        }
                    }
                    Err(e) => {
                        let label = match e.limit_scope() {
                            Some(scope) => format!("{}:{}", e.kind(), scope),
                            None => e.kind().to_string(),
                        };
                        *tally.rejected.entry(label).or_default() += 1;
                    }
                }
            }
            tally
        }));
    }

    let mut report = SimulationReport {
        requests: options.requests,
        ..Default::default()
    };
    for worker in workers {
        let tally = worker.await?;
        for (id, count) in tally.selected {
            *report.selected.entry(id).or_default() += count;
        }
        for (kind, count) in tally.rejected {
            *report.rejected.entry(kind).or_default() += count;
        }
        report.reported_failures += tally.failures;
    }

    registry.sweep_orphans();
    report.breakers = registry.breaker_states();
    report.limiters = registry.rate_limiters();
    report.metrics = handle.map(|h| h.render());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let config = load_config(&path)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        config = %path.display(),
        services = config.services.len(),
        "model-router v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let registry = Arc::new(ModelServiceRegistry::new(&config, Arc::new(HealthStateStore::new())));
    let shutdown = Shutdown::new();
    let tasks = spawn_background(registry, Some(&path), &config.sweep, &shutdown)?;
    tracing::info!(tasks = tasks.len(), "Background tasks started");

    signals::shutdown_signal().await;
    shutdown.trigger();
    tasks.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

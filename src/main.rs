// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use task_workers::{
    broker::BrokerChannel,
    channel,
    config::WorkerConfig,
    dispatcher::{self, ErrorReporter},
    errors::WorkerError,
    processor::{EchoProcessor, ProcessorRegistry},
    publisher::Publisher,
    telemetry,
    topology::BindingTable,
};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "task-workers")]
#[command(about = "Runs task workers consuming from an AMQP broker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the queue of a worker until interrupted
    Start {
        /// Worker name, which is also the name of its queue
        name: String,
    },

    /// Publish one task to the audit exchange
    PublishAudit {
        /// Task as a JSON document
        task: String,
    },
}

fn processors() -> ProcessorRegistry {
    ProcessorRegistry::new().register("audit-echo", EchoProcessor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;

    telemetry::init(config.log_format)?;

    match cli.command {
        Command::Start { name } => start(&config, &name).await,
        Command::PublishAudit { task } => publish_audit(&config, &task).await,
    }
}

async fn start(config: &WorkerConfig, worker_name: &str) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, draining in-flight tasks");
            shutdown_tx.send_replace(true);
        }
    });

    let name = worker_name.to_owned();
    let on_error: ErrorReporter = Arc::new(move |err: &WorkerError| {
        error!(error = err.to_string(), worker = %name, "worker error");
    });

    dispatcher::create_worker(config, worker_name, processors(), on_error, shutdown_rx)
        .await
        .with_context(|| format!("worker `{}` stopped", worker_name))?;

    info!(worker = worker_name, "worker stopped");
    Ok(())
}

async fn publish_audit(config: &WorkerConfig, raw: &str) -> anyhow::Result<()> {
    let task: serde_json::Value = serde_json::from_str(raw).context("task is not valid JSON")?;

    let topology = Arc::new(BindingTable::from_file(&config.topology_path)?);
    let channel: Arc<dyn BrokerChannel> =
        Arc::new(channel::connect(&config.url_amqp, &config.connection_name).await?);

    let published = Publisher::new(channel.clone(), topology)
        .publish_audit_task(&task)
        .await;

    channel.close().await?;
    published?;

    info!("audit task published");
    Ok(())
}

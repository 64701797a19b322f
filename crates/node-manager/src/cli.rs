use crate::config::Config;
use crate::manager::ComputeNodeManager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "On-demand compute node manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register the configured nodes and manage them until interrupted
    Run {
        /// Path to the TOML config file
        #[arg(short = 'c', long)]
        config: Option<String>,

        /// Provisioner endpoint, takes precedence over file and environment
        #[arg(long)]
        provisioner_endpoint: Option<String>,

        /// Comma separated node ids to provision at startup
        #[arg(long, value_delimiter = ',')]
        prewarm: Vec<String>,

        /// Seconds between node status summaries, 0 disables them
        #[arg(long, default_value = "60")]
        report_interval: u64,

        /// Log level
        #[arg(short = 'l', long, default_value = "info")]
        log_level: String,
    },

    /// Validate a config file and print the nodes it declares
    Check {
        /// Path to the TOML config file
        #[arg(short = 'c', long)]
        config: String,

        /// Log level
        #[arg(short = 'l', long, default_value = "warn")]
        log_level: String,
    },
}

impl Cli {
    pub fn log_level(&self) -> &str {
        match &self.command {
            Commands::Run { log_level, .. } | Commands::Check { log_level, .. } => log_level,
        }
    }

    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        match self.command {
            Commands::Run {
                config,
                provisioner_endpoint,
                prewarm,
                report_interval,
                ..
            } => {
                let mut config = Config::load(config.as_deref())?;
                if let Some(endpoint) = provisioner_endpoint {
                    config.manager.provisioner_endpoint = endpoint;
                }
                run_manager(config, prewarm, report_interval, cancellation_token).await
            }
            Commands::Check { config, .. } => {
                let config = Config::load_from_file(&config)?;
                for node in &config.nodes {
                    node.validate()
                        .with_context(|| format!("invalid node {}", node.node_id))?;
                    println!("{node}");
                }
                println!(
                    "{} node(s), provisioner at {}",
                    config.nodes.len(),
                    config.manager.provisioner_endpoint
                );
                Ok(())
            }
        }
    }
}

async fn run_manager(
    config: Config,
    prewarm: Vec<String>,
    report_interval: u64,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let manager = Arc::new(ComputeNodeManager::from_config(config.manager)?);
    for node in config.nodes {
        let node_id = node.node_id.clone();
        manager
            .register_node(node)
            .with_context(|| format!("failed to register node {node_id}"))?;
    }
    manager.start().await;

    if !prewarm.is_empty() {
        let manager = manager.clone();
        tokio::spawn(async move {
            let results = join_all(
                prewarm
                    .iter()
                    .map(|node_id| manager.provision_node(node_id.as_str())),
            )
            .await;
            for (node_id, result) in prewarm.iter().zip(results) {
                match result.error {
                    None => info!("Pre-warmed node {node_id}"),
                    Some(e) => warn!("Pre-warming node {node_id} did not finish: {e}"),
                }
            }
        });
    }

    if report_interval > 0 {
        let mut ticker = interval(Duration::from_secs(report_interval));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for metadata in manager.get_all_node_metadata() {
                        info!(
                            "{} {} endpoint_available={} ready_in={}ms",
                            metadata.node_id,
                            metadata.status,
                            metadata.endpoint_available,
                            metadata.estimated_ready_in_ms
                        );
                    }
                }
                _ = cancellation_token.cancelled() => break,
            }
        }
    } else {
        cancellation_token.cancelled().await;
    }

    manager.shutdown().await;
    let still_running: Vec<String> = manager
        .get_all_nodes()
        .into_iter()
        .filter(|node| node.status.is_serving())
        .map(|node| node.config.node_id)
        .collect();
    if !still_running.is_empty() {
        info!(
            "Leaving {} node(s) provisioned: {}",
            still_running.len(),
            still_running.join(", ")
        );
    }
    Ok(())
}

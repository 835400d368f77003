//! Network routing simulator binary.
//!
//! Runs one simulated node per process on top of Redis pub/sub, injects test
//! messages into the network and prints topology files.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mesh_routing::{AlgorithmConfig, AlgorithmKind, FloodingConfig, LinkStateConfig};
use mesh_session::{inject_message, Node, NodeConfig, RedisTransport, Transport};
use mesh_wire::{DataMessage, Message};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{redis_settings_from_env, TopologyConfig};
use logging::NodeLogFormatter;

/// Pub/sub network routing simulator
#[derive(Parser, Debug)]
#[command(name = "meshsim", version, about = "Flooding and link-state routing over Redis pub/sub")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one node until Ctrl-C or SIGTERM
    Run(RunArgs),
    /// Publish a data message onto its origin node's channel
    Send(SendArgs),
    /// Print the links in a topology file
    Topology {
        /// Topology file (JSON, YAML or TOML)
        #[arg(long, default_value = "topo.json")]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Node ID, also the node's channel name
    node_id: String,

    /// Routing algorithm: flooding, lsr or dijkstra
    #[arg(long, default_value = "lsr")]
    algorithm: AlgorithmKind,

    /// Topology file (JSON, YAML or TOML)
    #[arg(long, default_value = "topo.json")]
    config: PathBuf,

    /// Hello interval, e.g. 3s
    #[arg(long, default_value = "3s", value_parser = non_zero_duration)]
    hello_interval: humantime::Duration,

    /// Length of one liveness tick
    #[arg(long, default_value = "1s", value_parser = non_zero_duration)]
    sweep_interval: humantime::Duration,

    /// Ticks without a hello before a neighbor is declared dead
    #[arg(long, default_value_t = 15)]
    neighbor_timeout_ticks: u32,

    /// Shortest-path report interval
    #[arg(long, default_value = "15s", value_parser = non_zero_duration)]
    shortest_path_interval: humantime::Duration,

    /// Own-edge re-advertisement interval
    #[arg(long, default_value = "15s", value_parser = non_zero_duration)]
    advertise_interval: humantime::Duration,

    /// How long flooded message fingerprints are remembered
    #[arg(long, default_value = "120s")]
    seen_window: humantime::Duration,

    /// Maximum remembered fingerprints
    #[arg(long, default_value_t = 65_536)]
    seen_capacity: usize,

    /// Subscription poll timeout
    #[arg(long, default_value = "1s", value_parser = non_zero_duration)]
    poll_timeout: humantime::Duration,
}

impl RunArgs {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            poll_timeout: self.poll_timeout.into(),
            algorithm: AlgorithmConfig {
                flooding: FloodingConfig {
                    seen_window: self.seen_window.into(),
                    seen_capacity: self.seen_capacity,
                },
                link_state: LinkStateConfig {
                    hello_interval: self.hello_interval.into(),
                    sweep_interval: self.sweep_interval.into(),
                    neighbor_timeout_ticks: self.neighbor_timeout_ticks,
                    shortest_path_interval: self.shortest_path_interval.into(),
                    advertise_interval: self.advertise_interval.into(),
                },
            },
        }
    }
}

fn non_zero_duration(value: &str) -> Result<humantime::Duration, String> {
    let duration: humantime::Duration = value.parse().map_err(|e| format!("{}", e))?;
    if duration.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(duration)
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Origin node; the message is published onto its channel
    #[arg(long)]
    from: String,

    /// Destination node
    #[arg(long)]
    to: String,

    /// Message payload
    #[arg(long)]
    message: String,

    /// Hop budget
    #[arg(long, default_value_t = 15)]
    ttl: i64,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let label = match &cli.command {
        Command::Run(args) => args.node_id.clone(),
        _ => "meshsim".to_string(),
    };
    init_tracing(&cli.log_level, label)?;

    match cli.command {
        Command::Run(args) => run_node(args).await,
        Command::Send(args) => send_test_message(args).await,
        Command::Topology { config } => print_topology(&config),
    }
}

fn init_tracing(log_level: &str, label: String) -> anyhow::Result<()> {
    let mut env_filter = EnvFilter::new("warn");
    for target in ["meshsim", "mesh_session", "mesh_routing", "mesh_topology", "mesh_wire"] {
        env_filter = env_filter.add_directive(format!("{}={}", target, log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(NodeLogFormatter::new(label))
        .init();

    Ok(())
}

async fn run_node(args: RunArgs) -> anyhow::Result<()> {
    info!("Starting meshsim v{}", env!("CARGO_PKG_VERSION"));

    let topology = TopologyConfig::load_from_file(&args.config)?;
    let neighbors = topology.neighbors_of(&args.node_id)?;
    let settings = redis_settings_from_env();

    info!(
        component = "config",
        "Node {} has {} neighbors: {:?}",
        args.node_id,
        neighbors.len(),
        neighbors
    );
    info!(
        component = "config",
        "Using redis at {} with {} routing",
        settings.display_addr(),
        args.algorithm
    );

    let transport = Arc::new(RedisTransport::new(settings)?);
    let node = Node::new(
        args.node_id.clone(),
        neighbors,
        args.algorithm,
        transport,
        args.node_config(),
    );

    let mut handle = tokio::spawn(Arc::clone(&node).run());

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;

    let finished = tokio::select! {
        result = &mut handle => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, stopping node {}", args.node_id);
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, stopping node {}", args.node_id);
            None
        }
    };

    let result = match finished {
        Some(result) => result,
        None => {
            node.stop();
            handle.await
        }
    };
    result.context("node task panicked")??;

    let stats = node.stats();
    info!(
        "Node {} final routing table:\n{}",
        args.node_id,
        node.table().read().await.to_pretty_json()
    );
    info!(
        "Node {} received {} messages ({} malformed), sent {} ({} failed), delivered {}",
        args.node_id,
        stats.received,
        stats.malformed,
        stats.sent,
        stats.send_failures,
        stats.delivered
    );
    Ok(())
}

async fn send_test_message(args: SendArgs) -> anyhow::Result<()> {
    let settings = redis_settings_from_env();
    let transport = RedisTransport::new(settings.clone())?;
    transport
        .connect()
        .await
        .with_context(|| format!("failed to connect to redis at {}", settings.display_addr()))?;

    let data = DataMessage::new(&args.from, &args.to, args.message, args.ttl);
    let receivers = inject_message(&transport, &args.from, &Message::Data(data)).await?;
    if receivers == 0 {
        warn!("No node is listening on channel {}", args.from);
    } else {
        info!(
            "Sent test message {} -> {} (ttl {})",
            args.from, args.to, args.ttl
        );
    }

    transport.close().await;
    Ok(())
}

fn print_topology(path: &Path) -> anyhow::Result<()> {
    let topology = TopologyConfig::load_from_file(path)?;

    for (node, neighbors) in &topology.config {
        let links: Vec<String> = neighbors
            .iter()
            .map(|(neighbor, cost)| format!("{} ({})", neighbor, cost))
            .collect();
        println!("{} -> {}", node, links.join(", "));
    }

    let asymmetric = topology.asymmetric_links();
    if !asymmetric.is_empty() {
        println!("one-way links:");
        for (from, to) in asymmetric {
            println!("  {} -> {}", from, to);
        }
    }
    Ok(())
}

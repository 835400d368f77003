//! Configuration handling for meshsim.
//!
//! The topology file describes every node's static neighbors and link costs.
//! Redis connection settings come from the environment.

use anyhow::{anyhow, bail, Context, Result};
use mesh_session::RedisSettings;
use mesh_topology::NeighborSet;
use mesh_wire::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const TOPOLOGY_KIND: &str = "topo";

/// Network topology: node -> neighbor -> cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Document kind, expected to be `topo`
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Static neighbors per node
    pub config: BTreeMap<NodeId, NeighborSet>,
}

fn default_kind() -> String {
    TOPOLOGY_KIND.to_string()
}

/// Supported topology file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyFormat {
    Json,
    Yaml,
    Toml,
}

impl TopologyFormat {
    /// Pick the format from a file extension, defaulting to JSON
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") | None => Ok(TopologyFormat::Json),
            Some("yaml") | Some("yml") => Ok(TopologyFormat::Yaml),
            Some("toml") => Ok(TopologyFormat::Toml),
            Some(other) => bail!("unsupported topology file extension `.{}`", other),
        }
    }
}

impl TopologyConfig {
    /// Load and validate a topology file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = TopologyFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read topology file {:?}", path))?;

        let topology = Self::parse(&content, format)
            .with_context(|| format!("failed to parse topology file {:?}", path))?;

        info!(
            component = "config",
            "Loaded topology from {:?}: {} nodes, {} links",
            path,
            topology.config.len(),
            topology.link_count()
        );
        Ok(topology)
    }

    /// Parse and validate topology text
    pub fn parse(content: &str, format: TopologyFormat) -> Result<Self> {
        let topology: TopologyConfig = match format {
            TopologyFormat::Json => serde_json::from_str(content)?,
            TopologyFormat::Yaml => serde_yaml::from_str(content)?,
            TopologyFormat::Toml => toml::from_str(content)?,
        };
        topology.validate()?;
        Ok(topology)
    }

    fn validate(&self) -> Result<()> {
        if self.kind != TOPOLOGY_KIND {
            warn!(
                component = "config",
                "Topology document type is `{}`, expected `{}`", self.kind, TOPOLOGY_KIND
            );
        }

        for (node, neighbors) in &self.config {
            for (neighbor, &cost) in neighbors {
                if cost < 0 {
                    bail!("link {} -> {} has negative cost {}", node, neighbor, cost);
                }
                if neighbor == node {
                    bail!("node {} lists itself as a neighbor", node);
                }
            }
        }

        for (from, to) in self.asymmetric_links() {
            warn!(
                component = "config",
                "Link {} -> {} has no reverse entry; {} will not send hellos to {}", from, to, to, from
            );
        }

        Ok(())
    }

    /// Static neighbors of `node`
    pub fn neighbors_of(&self, node: &str) -> Result<NeighborSet> {
        self.config
            .get(node)
            .cloned()
            .ok_or_else(|| anyhow!("node {} is not part of the topology", node))
    }

    /// Number of directed links
    pub fn link_count(&self) -> usize {
        self.config.values().map(|neighbors| neighbors.len()).sum()
    }

    /// Links whose target does not list the source back
    pub fn asymmetric_links(&self) -> Vec<(NodeId, NodeId)> {
        let mut links = Vec::new();
        for (from, neighbors) in &self.config {
            for to in neighbors.keys() {
                let reverse = self
                    .config
                    .get(to)
                    .map(|back| back.contains_key(from))
                    .unwrap_or(false);
                if !reverse {
                    links.push((from.clone(), to.clone()));
                }
            }
        }
        links
    }
}

/// Redis settings from `REDIS_HOST`, `REDIS_PORT` and `REDIS_PASSWORD`
pub fn redis_settings_from_env() -> RedisSettings {
    redis_settings_from(|key| std::env::var(key).ok())
}

fn redis_settings_from(lookup: impl Fn(&str) -> Option<String>) -> RedisSettings {
    let mut settings = RedisSettings::default();

    if let Some(host) = lookup("REDIS_HOST").filter(|host| !host.is_empty()) {
        settings.host = host;
    }

    if let Some(port) = lookup("REDIS_PORT") {
        match port.parse::<u16>() {
            Ok(port) => settings.port = port,
            Err(_) => warn!(
                component = "config",
                "Ignoring invalid REDIS_PORT `{}`, using {}", port, settings.port
            ),
        }
    }

    settings.password = lookup("REDIS_PASSWORD").filter(|password| !password.is_empty());
    settings
}

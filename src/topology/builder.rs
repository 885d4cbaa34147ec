//! Turns a validated `Topology` into platform calls.

use log::{debug, info};

use super::types::NodeRole;
use super::validate::Topology;
use crate::platform::{Platform, PlatformError};

/// First element the platform refused while building a fabric
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to create node '{name}': {source}")]
    Node {
        name: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to create link {a}-{b}: {source}")]
    Link {
        a: String,
        b: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to install default forwarding on '{switch}': {source}")]
    Forwarding {
        switch: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to start the fabric: {0}")]
    Start(#[source] PlatformError),
}

/// Create every node, then every link, in descriptor order.
///
/// Stops at the first rejection. Nothing is torn down here; the caller owns
/// the platform lifecycle and always calls `stop`.
pub async fn build(topology: &Topology, platform: &dyn Platform) -> Result<(), BuildError> {
    let descriptor = topology.descriptor();
    info!("Creating {} nodes for '{}'", descriptor.nodes.len(), topology.name());

    for node in &descriptor.nodes {
        let result = match node.role {
            NodeRole::Host => platform.create_host(&node.name).await,
            NodeRole::Switch { .. } => {
                let options = node.switch_options().unwrap_or_default();
                debug!(
                    "switch {} redundancy={:?} fail_mode={}",
                    node.name,
                    options.redundancy,
                    options.fail_mode.as_str()
                );
                platform.create_switch(&node.name, &options).await
            }
        };
        result.map_err(|source| BuildError::Node {
            name: node.name.clone(),
            source,
        })?;
    }

    info!("Creating {} links", descriptor.links.len());
    for link in &descriptor.links {
        debug!(
            "link {}-{} {} Mbps {:?}",
            link.a, link.b, link.params.bandwidth_mbps, link.params.delay
        );
        platform
            .create_link(&link.a, &link.b, &link.params)
            .await
            .map_err(|source| BuildError::Link {
                a: link.a.clone(),
                b: link.b.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Start the platform, mapping its failure into a `BuildError`
pub async fn start(platform: &dyn Platform) -> Result<(), BuildError> {
    info!("Starting network");
    platform.start().await.map_err(BuildError::Start)
}

/// Install normal forwarding on every plain switch. Run after `start`.
pub async fn configure_forwarding(topology: &Topology, platform: &dyn Platform) -> Result<(), BuildError> {
    let plain: Vec<&str> = topology
        .switches()
        .filter(|s| !s.switch_options().map_or(false, |o| o.loop_prevention_enabled()))
        .map(|s| s.name.as_str())
        .collect();
    if plain.is_empty() {
        return Ok(());
    }

    info!("Setting default forwarding on {} switches", plain.len());
    for switch in plain {
        platform
            .set_default_forwarding(switch)
            .await
            .map_err(|source| BuildError::Forwarding {
                switch: switch.to_string(),
                source,
            })?;
    }
    Ok(())
}

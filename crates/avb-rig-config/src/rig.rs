// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-disk rig description.

use avb_oracle_core::{Analyzer, Endpoint, Links, Topology, TopologyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The controller process entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Process name; also the controller's node in `port_connections`.
    pub name: String,
}

/// A rig file: participants plus the physical wiring between them.
///
/// Unknown top-level keys (signal generators, log settings) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Boards running the daisy-chain firmware.
    pub endpoints: Vec<Endpoint>,
    /// Audio and traffic analyzers, including relay nodes.
    pub analyzers: Vec<Analyzer>,
    /// Undirected adjacency; neighbour order is the search order.
    pub port_connections: Links,
    /// Controller process.
    pub controller: ControllerConfig,
}

impl RigConfig {
    /// Builds the topology `user` sees and validates it.
    pub fn into_topology(self, user: &str) -> Result<Topology, TopologyError> {
        let mut topology = Topology::new(user, self.controller.name);
        for analyzer in self.analyzers {
            topology.add_analyzer(analyzer)?;
        }
        for endpoint in self.endpoints {
            topology.add_endpoint(endpoint)?;
        }
        topology.set_links(self.port_connections);
        topology.validate()?;
        debug!(user, controller = topology.controller(), "topology built");
        Ok(topology)
    }
}

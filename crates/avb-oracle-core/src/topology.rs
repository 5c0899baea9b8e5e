// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Static rig topology: participants, the physical adjacency and the
//! controller's attachment point.
//!
//! The adjacency is an undirected graph written as `node → [neighbour…]`.
//! Endpoint nodes link to their port nodes (`dc0` ↔ `dc0_0`, `dc0_1`), ports
//! link to each other or to relay analyzers sitting on the cable. Neighbour
//! order is kept exactly as declared: path search visits neighbours in that
//! order and the first path found is the one the oracle reasons about.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::TopologyError;
use crate::ident::StreamIndex;
use crate::model::{Analyzer, Endpoint};

/// Undirected adjacency, neighbour order preserved.
pub type Links = BTreeMap<String, Vec<String>>;

/// Immutable description of the rig under test.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    links: Links,
    endpoints: BTreeMap<String, Endpoint>,
    analyzers: BTreeMap<String, Analyzer>,
    controller: String,
    user: String,
}

impl Topology {
    /// Creates an empty topology resolving hardware ids for `user`, with the
    /// controller attached at node `controller`.
    pub fn new(user: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            controller: controller.into(),
            ..Self::default()
        }
    }

    /// Installs the physical adjacency. Replaces any previous links.
    pub fn set_links(&mut self, links: Links) {
        self.links = links;
    }

    /// Registers an endpoint.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<(), TopologyError> {
        if self.endpoints.contains_key(&endpoint.name) || self.analyzers.contains_key(&endpoint.name)
        {
            return Err(TopologyError::DuplicateName(endpoint.name));
        }
        self.endpoints.insert(endpoint.name.clone(), endpoint);
        Ok(())
    }

    /// Registers an analyzer.
    pub fn add_analyzer(&mut self, analyzer: Analyzer) -> Result<(), TopologyError> {
        if self.endpoints.contains_key(&analyzer.name) || self.analyzers.contains_key(&analyzer.name)
        {
            return Err(TopologyError::DuplicateName(analyzer.name));
        }
        self.analyzers.insert(analyzer.name.clone(), analyzer);
        Ok(())
    }

    /// Checks the cross references a loaded rig must satisfy before any
    /// prediction is made.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for endpoint in self.endpoints.values() {
            if !(1..=2).contains(&endpoint.ports) {
                return Err(TopologyError::BadPortCount {
                    endpoint: endpoint.name.clone(),
                    ports: endpoint.ports,
                });
            }
            if !self.analyzers.contains_key(&endpoint.analyzer) {
                return Err(TopologyError::UnknownAnalyzer {
                    endpoint: endpoint.name.clone(),
                    analyzer: endpoint.analyzer.clone(),
                });
            }
            if !endpoint.users.contains_key(&self.user) {
                return Err(TopologyError::MissingUser {
                    entity: endpoint.name.clone(),
                    user: self.user.clone(),
                });
            }
        }
        for analyzer in self.analyzers.values() {
            if !analyzer.users.contains_key(&self.user) {
                return Err(TopologyError::MissingUser {
                    entity: analyzer.name.clone(),
                    user: self.user.clone(),
                });
            }
        }
        if !self.links.contains_key(&self.controller) {
            return Err(TopologyError::UnlinkedNode(self.controller.clone()));
        }
        for neighbour in self.links.values().flatten() {
            if !self.links.contains_key(neighbour) {
                return Err(TopologyError::UnlinkedNode(neighbour.clone()));
            }
        }
        debug!(
            endpoints = self.endpoints.len(),
            analyzers = self.analyzers.len(),
            nodes = self.links.len(),
            "topology validated"
        );
        Ok(())
    }

    /// Neighbours of `node` in declaration order, `None` when the node has no
    /// adjacency entry.
    pub fn neighbours(&self, node: &str) -> Option<&[String]> {
        self.links.get(node).map(Vec::as_slice)
    }

    /// Full adjacency.
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Looks up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    /// Whether `name` is an endpoint (as opposed to a port, relay or controller node).
    pub fn is_endpoint(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// All endpoints, ordered by name.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Endpoint names, ordered.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Looks up an analyzer by name.
    pub fn analyzer(&self, name: &str) -> Option<&Analyzer> {
        self.analyzers.get(name)
    }

    /// All analyzers, ordered by name.
    pub fn analyzers(&self) -> impl Iterator<Item = &Analyzer> {
        self.analyzers.values()
    }

    /// Analyzer wired to an endpoint's audio I/O.
    pub fn analyzer_for(&self, endpoint: &Endpoint) -> Option<&Analyzer> {
        self.analyzers.get(&endpoint.analyzer)
    }

    /// Node (and process name) of the AVDECC controller.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Rig user whose hardware ids are used.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// AVB entity id of an endpoint for the selected user, without `0x`.
    pub fn avb_id(&self, endpoint: &str) -> Option<&str> {
        self.endpoints
            .get(endpoint)
            .and_then(|ep| ep.users.get(&self.user))
            .map(|ids| ids.avb_id.as_str())
    }

    /// Endpoint expected to win the PTP grandmaster election: the one with
    /// the lowest entity id for the selected user. Endpoints whose id is not
    /// hex never win.
    pub fn grandmaster(&self) -> Option<&Endpoint> {
        self.endpoints
            .values()
            .filter_map(|ep| {
                let id = u64::from_str_radix(self.avb_id(&ep.name)?, 16).ok()?;
                Some((id, ep))
            })
            .min_by_key(|(id, _)| *id)
            .map(|(_, ep)| ep)
    }

    /// Stream id the 1722 router reports for a talker stream: the entity id
    /// with its `fffe` infix removed, followed by the four-digit stream index,
    /// upper-cased.
    pub fn stream_id(&self, endpoint: &str, stream: StreamIndex) -> Option<String> {
        self.avb_id(endpoint)
            .map(|id| format!("{}{stream:04}", id.replace("fffe", "")).to_uppercase())
    }
}

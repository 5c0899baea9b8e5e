// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rig fixtures.
//!
//! Endpoint `dcN` owns port nodes `dcN_0` and `dcN_1`; the digit after the
//! underscore is the port number the forwarding analytics read back. Hops
//! between endpoints go through relay nodes, which are qav analyzers, so a
//! relay can be opened to cut the link.

use std::collections::BTreeMap;
use std::sync::Arc;

use avb_oracle_core::{Analyzer, AnalyzerKind, Endpoint, Links, Topology, TopologyError, UserIds};

/// User every fixture registers ids for.
pub const FIXTURE_USER: &str = "ci";
/// Controller process in every fixture.
pub const FIXTURE_CONTROLLER: &str = "ctl";
/// Audio analyzer shared by every fixture endpoint.
pub const AUDIO_ANALYZER: &str = "analyzer";

/// `avb_id` assigned to the `index`-th endpoint added to a builder.
pub fn fixture_avb_id(index: usize) -> String {
    format!("002297fffe{:06x}", index + 1)
}

fn ids(avb_id: String) -> BTreeMap<String, UserIds> {
    BTreeMap::from([(
        FIXTURE_USER.to_owned(),
        UserIds {
            avb_id,
            xrun_adapter_id: String::new(),
        },
    )])
}

/// Incremental topology builder.
///
/// # Example
///
/// ```
/// use avb_dry_tests::TopologyBuilder;
///
/// let topology = TopologyBuilder::new()
///     .endpoint("dc0", 2)
///     .endpoint("dc1", 2)
///     .relay("relay0", "dc0_1", "dc1_0")
///     .controller_at("dc0_0")
///     .build();
/// assert!(topology.is_endpoint("dc1"));
/// ```
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    endpoints: Vec<Endpoint>,
    analyzers: Vec<Analyzer>,
    links: Links,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyBuilder {
    /// Builder with the shared audio analyzer and no endpoints.
    pub fn new() -> Self {
        let audio = Analyzer {
            name: AUDIO_ANALYZER.to_owned(),
            port: 0,
            kind: AnalyzerKind::Audio,
            base: 0,
            frequencies: (0..16).map(|c| (c, 1000 * (c + 1))).collect(),
            users: ids(String::new()),
        };
        Self {
            endpoints: Vec::new(),
            analyzers: vec![audio],
            links: Links::new(),
        }
    }

    fn link(&mut self, a: &str, b: &str) {
        self.links.entry(a.to_owned()).or_default().push(b.to_owned());
        self.links.entry(b.to_owned()).or_default().push(a.to_owned());
    }

    /// Adds a 2-in/2-out 48 kHz endpoint with `ports` port nodes. Each
    /// endpoint listens on its own pair of analyzer channels.
    pub fn endpoint(mut self, name: &str, ports: u8) -> Self {
        let index = self.endpoints.len();
        let offset = u32::try_from(index * 2).unwrap_or(u32::MAX);
        self.endpoints.push(Endpoint {
            name: name.to_owned(),
            ports,
            in_channels: 2,
            out_channels: 2,
            talker_streams: 1,
            sample_rate: 48_000,
            analyzer: AUDIO_ANALYZER.to_owned(),
            analyzer_offset: offset,
            descriptors: BTreeMap::new(),
            users: ids(fixture_avb_id(index)),
        });
        for port in 0..ports {
            self.link(name, &format!("{name}_{port}"));
        }
        self
    }

    /// Changes the output channel count of an endpoint already added.
    pub fn out_channels(mut self, name: &str, channels: u32) -> Self {
        if let Some(ep) = self.endpoints.iter_mut().find(|ep| ep.name == name) {
            ep.out_channels = channels;
        }
        self
    }

    /// Joins two port nodes through a relay that is also a qav analyzer.
    pub fn relay(mut self, name: &str, a: &str, b: &str) -> Self {
        self.analyzers.push(Analyzer {
            name: name.to_owned(),
            port: 0,
            kind: AnalyzerKind::Qav,
            base: 0,
            frequencies: BTreeMap::new(),
            users: ids(String::new()),
        });
        self.link(a, name);
        self.link(name, b);
        self
    }

    /// Joins two port nodes with a plain cable.
    pub fn cable(mut self, a: &str, b: &str) -> Self {
        self.link(a, b);
        self
    }

    /// Plugs the controller into `port_node`.
    pub fn controller_at(mut self, port_node: &str) -> Self {
        self.link(FIXTURE_CONTROLLER, port_node);
        self
    }

    /// Builds and validates the topology.
    pub fn try_build(self) -> Result<Topology, TopologyError> {
        let mut topology = Topology::new(FIXTURE_USER, FIXTURE_CONTROLLER);
        for analyzer in self.analyzers {
            topology.add_analyzer(analyzer)?;
        }
        for endpoint in self.endpoints {
            topology.add_endpoint(endpoint)?;
        }
        topology.set_links(self.links);
        topology.validate()?;
        Ok(topology)
    }

    /// Builds the topology, shared the way the oracle holds it.
    ///
    /// # Panics
    ///
    /// Panics if the fixture does not validate.
    #[allow(clippy::expect_used)]
    pub fn build(self) -> Arc<Topology> {
        Arc::new(self.try_build().expect("fixture topology should validate"))
    }
}

/// `n` dual-port endpoints `dc0..dc{n-1}` in a line, hop `i` going through
/// relay `relay{i}`, with the controller on `dc0_0`.
pub fn daisy_chain(n: usize) -> Arc<Topology> {
    let mut builder = TopologyBuilder::new();
    for i in 0..n {
        builder = builder.endpoint(&format!("dc{i}"), 2);
    }
    for i in 1..n {
        builder = builder.relay(
            &format!("relay{}", i - 1),
            &format!("dc{}_1", i - 1),
            &format!("dc{i}_0"),
        );
    }
    builder.controller_at("dc0_0").build()
}

/// `daisy_chain(4)`: streams from `dc0` to `dc2` cross `dc1` only, leaving
/// `dc3` beyond `dc2` as a dual-port bystander.
pub fn linear_with_bystander() -> Arc<Topology> {
    daisy_chain(4)
}

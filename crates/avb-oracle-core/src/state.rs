// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connection registry: the oracle's model of what the rig should currently
//! be doing.
//!
//! A [`State`] is one generation of the model. The orchestrator owns two of
//! them: `current`, which only advances when a checkpoint is confirmed, and
//! `next`, which every action mutates. Counts are kept in ordered maps and
//! entries are removed when they reach zero, so iteration order (and with it
//! every prediction) depends only on the set of live connections.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::graph;
use crate::ident::{Connection, Listener, StreamIndex, Talker};
use crate::render;
use crate::topology::Topology;

/// Direction of a stream-management action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamAction {
    /// Establish a talker→listener connection.
    Connect,
    /// Tear a connection down.
    Disconnect,
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        })
    }
}

/// What the talker side of a connect/disconnect will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkerOutcome {
    /// The stream starts.
    New,
    /// The stream is already running for another listener (connect), or keeps
    /// running for other listeners (disconnect).
    Existing,
    /// The last listener leaves and the stream stops.
    AllOff,
    /// Nothing happens.
    Redundant,
}

/// What the listener side of a connect/disconnect will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// The sink changes state.
    Active,
    /// Nothing happens.
    Redundant,
}

/// How the controller will answer a connect/disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerOutcome {
    /// Command acknowledged.
    Success,
    /// The listener sink is already bound to another talker.
    ListenerExclusive,
    /// An endpoint is unreachable from the controller.
    Timeout,
    /// No response is expected.
    Redundant,
}

/// One generation of the connection registry.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    topology: Arc<Topology>,
    active_connections: BTreeMap<Connection, u32>,
    active_talkers: BTreeMap<Talker, u32>,
    active_listeners: BTreeMap<Listener, u32>,
    talker_on_count: BTreeMap<String, u32>,
    clock_source_master: BTreeSet<String>,
    open_relays: BTreeSet<String>,
}

impl State {
    /// Creates an empty registry over `topology`.
    pub fn new(topology: Arc<Topology>) -> Self {
        Self {
            topology,
            active_connections: BTreeMap::new(),
            active_talkers: BTreeMap::new(),
            active_listeners: BTreeMap::new(),
            talker_on_count: BTreeMap::new(),
            clock_source_master: BTreeSet::new(),
            open_relays: BTreeSet::new(),
        }
    }

    /// The static topology this registry reasons over.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Records a connection.
    ///
    /// No-op (returns `false`) when the connection already exists, the
    /// listener is claimed, or no relay-aware path joins the endpoints.
    pub fn connect(&mut self, connection: &Connection) -> bool {
        if self.is_connected(connection) || self.listener_active_count(&connection.listener) > 0 {
            return false;
        }
        if graph::find_path(self, connection.src(), connection.dst()).is_none() {
            return false;
        }
        *self
            .talker_on_count
            .entry(connection.src().to_owned())
            .or_insert(0) += 1;
        *self
            .active_talkers
            .entry(connection.talker.clone())
            .or_insert(0) += 1;
        self.active_listeners.insert(connection.listener.clone(), 1);
        *self
            .active_connections
            .entry(connection.clone())
            .or_insert(0) += 1;
        debug!(%connection, "registry connect");
        true
    }

    /// Removes a connection. No-op (returns `false`) when it does not exist.
    ///
    /// A count dropping below zero means the registry diverged from its own
    /// bookkeeping: debug builds panic, release builds log and leave it at
    /// zero.
    pub fn disconnect(&mut self, connection: &Connection) -> bool {
        if !self.is_connected(connection) {
            return false;
        }
        release(&mut self.active_talkers, &connection.talker, "talker");
        release(&mut self.active_listeners, &connection.listener, "listener");
        release(&mut self.active_connections, connection, "connection");
        debug!(%connection, "registry disconnect");
        true
    }

    /// Whether this exact connection is live.
    pub fn is_connected(&self, connection: &Connection) -> bool {
        self.active_connections.get(connection).copied().unwrap_or(0) > 0
    }

    /// Whether `talker` feeds endpoint `dst`, on sink `dst_stream` if given or
    /// on any sink otherwise.
    pub fn connected(&self, talker: &Talker, dst: &str, dst_stream: Option<StreamIndex>) -> bool {
        let connected = match dst_stream {
            Some(stream) => self.is_connected(&Connection {
                talker: talker.clone(),
                listener: Listener::new(dst, stream),
            }),
            None => self
                .active_connections
                .keys()
                .any(|c| c.talker == *talker && c.dst() == dst),
        };
        debug!(%talker, dst, ?dst_stream, connected, "connected?");
        connected
    }

    /// Number of live connections sourced by `talker`.
    pub fn talker_active_count(&self, talker: &Talker) -> u32 {
        self.active_talkers.get(talker).copied().unwrap_or(0)
    }

    /// 1 when the sink is bound, 0 otherwise.
    pub fn listener_active_count(&self, listener: &Listener) -> u32 {
        self.active_listeners.get(listener).copied().unwrap_or(0)
    }

    /// Lifetime number of successful connects sourced by endpoint `src`.
    pub fn talker_on_count(&self, src: &str) -> u32 {
        self.talker_on_count.get(src).copied().unwrap_or(0)
    }

    /// Live connections with their reference counts.
    pub fn connections(&self) -> impl Iterator<Item = (&Connection, u32)> {
        self.active_connections.iter().map(|(c, n)| (c, *n))
    }

    /// Live talker streams with their reference counts.
    pub fn talkers(&self) -> impl Iterator<Item = (&Talker, u32)> {
        self.active_talkers.iter().map(|(t, n)| (t, *n))
    }

    /// Bound listener sinks.
    pub fn listeners(&self) -> impl Iterator<Item = &Listener> {
        self.active_listeners.keys()
    }

    /// Classifies the talker's reaction to `action` on `connection`.
    pub fn talker_state(&self, connection: &Connection, action: StreamAction) -> TalkerOutcome {
        let outcome = if graph::find_path(self, connection.src(), connection.dst()).is_none() {
            TalkerOutcome::Redundant
        } else {
            match action {
                StreamAction::Connect => {
                    if self.is_connected(connection)
                        || self.listener_active_count(&connection.listener) > 0
                    {
                        TalkerOutcome::Redundant
                    } else if self.talker_active_count(&connection.talker) > 0 {
                        TalkerOutcome::Existing
                    } else {
                        TalkerOutcome::New
                    }
                }
                StreamAction::Disconnect => {
                    if !self.is_connected(connection) {
                        TalkerOutcome::Redundant
                    } else if self.talker_active_count(&connection.talker) == 1 {
                        TalkerOutcome::AllOff
                    } else {
                        TalkerOutcome::Existing
                    }
                }
            }
        };
        debug!(%connection, %action, ?outcome, "talker state");
        outcome
    }

    /// Classifies the listener's reaction to `action` on `connection`.
    pub fn listener_state(&self, connection: &Connection, action: StreamAction) -> ListenerOutcome {
        let outcome = if graph::find_path(self, connection.src(), connection.dst()).is_none() {
            ListenerOutcome::Redundant
        } else {
            let active = match action {
                StreamAction::Connect => self.listener_active_count(&connection.listener) == 0,
                StreamAction::Disconnect => self.is_connected(connection),
            };
            if active {
                ListenerOutcome::Active
            } else {
                ListenerOutcome::Redundant
            }
        };
        debug!(%connection, %action, ?outcome, "listener state");
        outcome
    }

    /// Classifies the controller's answer to `action` on `connection`.
    pub fn controller_state(
        &self,
        connection: &Connection,
        action: StreamAction,
    ) -> ControllerOutcome {
        let reachable = graph::get_endpoints_connected_to(self, self.topology.controller());
        let outcome = if !reachable.contains(connection.src()) || !reachable.contains(connection.dst())
        {
            ControllerOutcome::Timeout
        } else {
            match action {
                StreamAction::Connect => {
                    if !self.is_connected(connection)
                        && self.listener_active_count(&connection.listener) > 0
                    {
                        ControllerOutcome::ListenerExclusive
                    } else {
                        ControllerOutcome::Success
                    }
                }
                StreamAction::Disconnect => {
                    if self.is_connected(connection) {
                        ControllerOutcome::Success
                    } else {
                        ControllerOutcome::Redundant
                    }
                }
            }
        };
        debug!(%connection, %action, ?outcome, "controller state");
        outcome
    }

    /// Whether `node` currently drives the media clock of its loop.
    pub fn is_clock_source_master(&self, node: &str) -> bool {
        self.clock_source_master.contains(node)
    }

    /// Marks `node` as clock source master.
    pub fn set_clock_source_master(&mut self, node: &str) {
        self.clock_source_master.insert(node.to_owned());
    }

    /// Returns `node` to deriving its clock from its input stream.
    pub fn set_clock_source_slave(&mut self, node: &str) {
        self.clock_source_master.remove(node);
    }

    /// Endpoints currently acting as clock source master.
    pub fn clock_masters(&self) -> impl Iterator<Item = &str> {
        self.clock_source_master.iter().map(String::as_str)
    }

    /// Whether the relay at `node` is open (link cut).
    pub fn is_relay_open(&self, node: &str) -> bool {
        self.open_relays.contains(node)
    }

    /// Opens the relay at `node`.
    pub fn set_relay_open(&mut self, node: &str) {
        self.open_relays.insert(node.to_owned());
    }

    /// Closes the relay at `node`.
    pub fn set_relay_closed(&mut self, node: &str) {
        self.open_relays.remove(node);
    }

    /// Logs every live count and the wiring diagram at debug level.
    pub fn dump(&self) {
        for (talker, n) in &self.active_talkers {
            debug!(%talker, count = n, "talker");
        }
        for listener in self.active_listeners.keys() {
            debug!(%listener, "listener");
        }
        for (connection, n) in &self.active_connections {
            debug!(%connection, count = n, "connection");
        }
        for (src, n) in &self.talker_on_count {
            debug!(src = %src, count = n, "talker on count");
        }
        for master in &self.clock_source_master {
            debug!(%master, "clock source master");
        }
        for line in render::draw_state(self, &self.topology.endpoint_names()) {
            debug!("{line}");
        }
    }
}

fn release<K: Ord + fmt::Display>(counts: &mut BTreeMap<K, u32>, key: &K, what: &str) {
    let Some(n) = counts.get(key).copied().filter(|n| *n > 0) else {
        debug_assert!(false, "{what} {key} released with a zero count");
        warn!(%key, what, "released with a zero count");
        return;
    };
    if n == 1 {
        counts.remove(key);
    } else if let Some(count) = counts.get_mut(key) {
        *count = n - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Links;

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released with a zero count")]
    fn releasing_a_zero_count_is_fatal_in_debug() {
        let mut counts: BTreeMap<Talker, u32> = BTreeMap::new();
        release(&mut counts, &Talker::new("dc0", 0), "talker");
    }

    #[test]
    fn release_drops_the_entry_at_zero() {
        let talker = Talker::new("dc0", 0);
        let mut counts = BTreeMap::from([(talker.clone(), 2)]);
        release(&mut counts, &talker, "talker");
        assert_eq!(counts.get(&talker), Some(&1));
        release(&mut counts, &talker, "talker");
        assert!(counts.is_empty());
    }

    fn two_nodes() -> State {
        let links: Links = [
            ("ctl", vec!["dc0_0"]),
            ("dc0", vec!["dc0_0"]),
            ("dc0_0", vec!["dc0", "dc1_0", "ctl"]),
            ("dc1", vec!["dc1_0"]),
            ("dc1_0", vec!["dc1", "dc0_0"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.into_iter().map(str::to_owned).collect()))
        .collect();
        let mut topo = Topology::new("ci", "ctl");
        topo.set_links(links);
        State::new(Arc::new(topo))
    }

    #[test]
    fn connect_then_disconnect_restores_counts() {
        let mut state = two_nodes();
        let before = state.clone();
        let c = Connection::new("dc0", 0, "dc1", 0);
        assert!(state.connect(&c));
        assert_eq!(state.talker_active_count(&c.talker), 1);
        assert_eq!(state.listener_active_count(&c.listener), 1);
        assert!(state.disconnect(&c));
        assert_eq!(state.connections().count(), 0);
        assert_eq!(state.talkers().count(), before.talkers().count());
        assert_eq!(state.talker_on_count("dc0"), 1);
    }

    #[test]
    fn claimed_listener_rejects_second_talker() {
        let mut state = two_nodes();
        assert!(state.connect(&Connection::new("dc0", 0, "dc1", 0)));
        let other = Connection::new("dc0", 1, "dc1", 0);
        assert_eq!(state.talker_state(&other, StreamAction::Connect), TalkerOutcome::Redundant);
        assert_eq!(
            state.listener_state(&other, StreamAction::Connect),
            ListenerOutcome::Redundant
        );
        assert!(!state.connect(&other));
    }

    #[test]
    fn connected_without_sink_matches_any_sink() {
        let mut state = two_nodes();
        state.connect(&Connection::new("dc0", 0, "dc1", 1));
        let talker = Talker::new("dc0", 0);
        assert!(state.connected(&talker, "dc1", None));
        assert!(state.connected(&talker, "dc1", Some(1)));
        assert!(!state.connected(&talker, "dc1", Some(0)));
    }

    #[test]
    fn sink_zero_is_a_real_sink() {
        let mut state = two_nodes();
        state.connect(&Connection::new("dc0", 0, "dc1", 0));
        assert!(!state.connected(&Talker::new("dc0", 0), "dc1", Some(1)));
    }

    #[test]
    #[should_panic(expected = "released with a zero count")]
    fn release_of_zero_count_panics() {
        let mut counts: BTreeMap<Talker, u32> = BTreeMap::new();
        release(&mut counts, &Talker::new("dc0", 0), "talker");
    }

    #[test]
    fn open_relay_makes_everything_redundant() {
        let mut state = two_nodes();
        state.set_relay_open("dc0_0");
        let c = Connection::new("dc0", 0, "dc1", 0);
        assert_eq!(state.talker_state(&c, StreamAction::Connect), TalkerOutcome::Redundant);
        assert_eq!(state.controller_state(&c, StreamAction::Connect), ControllerOutcome::Timeout);
        assert!(!state.connect(&c));
        state.set_relay_closed("dc0_0");
        assert!(state.connect(&c));
    }
}

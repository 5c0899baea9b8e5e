// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph analytics over one registry generation.
//!
//! Paths are searched depth-first over the static adjacency, visiting
//! neighbours in declaration order; the first path found is authoritative.
//! The path so far doubles as the visited set and is passed by value, so each
//! branch sees only its own ancestors. Open relays are impassable.
//!
//! Port numbers are read from node names: the egress port of a node on a path
//! is the last character of the following path element (`dc1_1` → port 1).

use std::collections::BTreeSet;

use tracing::debug;

use crate::avb1722;
use crate::ident::{Connection, Talker};
use crate::model::AnalyzerKind;
use crate::state::{State, StreamAction};
use crate::topology::Topology;

/// Ordered list of node names from a start node to an end node.
pub type Path = Vec<String>;

/// Finds the first relay-aware path from `start` to `end`.
///
/// Returns `None` when the nodes are disconnected, when `start` has no
/// adjacency entry, or when `start` is a relay that is open (unless
/// `start == end`).
pub fn find_path(state: &State, start: &str, end: &str) -> Option<Path> {
    let path = search(state, start, end, Vec::new());
    debug!(start, end, ?path, "find_path");
    path
}

fn search(state: &State, start: &str, end: &str, mut path: Path) -> Option<Path> {
    path.push(start.to_owned());
    if start == end {
        return Some(path);
    }
    let neighbours = state.topology().neighbours(start)?;
    if state.is_relay_open(start) {
        return None;
    }
    for node in neighbours {
        if path.contains(node) {
            continue;
        }
        if let Some(found) = search(state, node, end, path.clone()) {
            return Some(found);
        }
    }
    None
}

/// Endpoints strictly between the first and last node of `path`.
pub fn get_path_endpoints(topology: &Topology, path: &[String]) -> Vec<String> {
    if path.len() < 3 {
        return Vec::new();
    }
    path[1..path.len() - 1]
        .iter()
        .filter(|node| topology.is_endpoint(node))
        .cloned()
        .collect()
}

/// Cycles in the directed talker→listener graph.
///
/// The search is seeded from each active talker's endpoint that is not
/// already part of a recorded loop. A cycle is recorded only when it returns
/// to its seed, written with the seed at both ends (`[dc0, dc1, dc0]`).
pub fn get_loops(state: &State) -> Vec<Path> {
    let mut loops: Vec<Path> = Vec::new();
    for (talker, _) in state.talkers() {
        if loops.iter().any(|l| l.contains(&talker.src)) {
            continue;
        }
        walk_loops(state, &talker.src, vec![talker.src.clone()], &mut loops);
    }
    debug!(?loops, "get_loops");
    loops
}

fn walk_loops(state: &State, node: &str, path: Path, loops: &mut Vec<Path>) {
    for (connection, _) in state.connections() {
        if connection.src() != node {
            continue;
        }
        let dest = connection.dst();
        if path.iter().any(|n| n == dest) {
            if path.first().is_some_and(|seed| seed == dest) {
                let mut cycle = path.clone();
                cycle.push(dest.to_owned());
                if !loops.contains(&cycle) {
                    loops.push(cycle);
                }
            }
        } else {
            let mut next = path.clone();
            next.push(dest.to_owned());
            walk_loops(state, dest, next, loops);
        }
    }
}

/// Whether `node` sits on any connection loop.
pub fn is_in_loop(state: &State, node: &str) -> bool {
    let in_loop = get_loops(state)
        .iter()
        .any(|l| l.iter().any(|n| n == node));
    debug!(node, in_loop, "is_in_loop");
    in_loop
}

fn port_of(name: &str) -> Option<u8> {
    name.chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .and_then(|d| u8::try_from(d).ok())
}

/// Port `node` forwards out of on the path `src → dst`.
pub fn get_forward_port(state: &State, src: &str, dst: &str, node: &str) -> Option<u8> {
    let port = find_path(state, src, dst).and_then(|path| {
        let index = path.iter().position(|n| n == node)?;
        path.get(index + 1).and_then(|next| port_of(next))
    });
    debug!(node, src, dst, ?port, "get_forward_port");
    port
}

/// Whether `port` of `node` is the egress port of `connection`'s path.
/// The listener's own node never egresses.
pub fn port_is_egress_in_path(state: &State, connection: &Connection, node: &str, port: u8) -> bool {
    if node == connection.dst() {
        return false;
    }
    let Some(path) = find_path(state, connection.src(), connection.dst()) else {
        return false;
    };
    path.iter()
        .position(|n| n == node)
        .and_then(|index| path.get(index + 1))
        .and_then(|next| port_of(next))
        == Some(port)
}

/// Reserved bandwidth (bits/s) egressing `port` of `endpoint`.
///
/// Sums one stream reservation per live connection whose path leaves through
/// the port; the extra bridge byte applies when `endpoint` is not the
/// connection's talker.
pub fn calculate_expected_bandwidth(state: &State, endpoint: &str, port: u8) -> u64 {
    let bandwidth: u64 = state
        .connections()
        .filter(|(c, _)| port_is_egress_in_path(state, c, endpoint, port))
        .filter_map(|(c, _)| state.topology().endpoint(c.src()))
        .map(|talker_ep| avb1722::stream_bandwidth(talker_ep, talker_ep.name != endpoint))
        .sum();
    debug!(endpoint, port, bandwidth, "calculate_expected_bandwidth");
    bandwidth
}

/// Whether the shaper on `port` of `node` changes when `talker` is connected
/// to or disconnected from one more listener.
///
/// Counts the talker's live connections egressing there: a connect changes
/// the shaper only if there are none yet, a disconnect only if this is the
/// last one.
pub fn port_will_see_bandwidth_change(
    state: &State,
    talker: &Talker,
    node: &str,
    port: u8,
    action: StreamAction,
) -> bool {
    let streams = state
        .connections()
        .filter(|(c, _)| c.talker == *talker)
        .filter(|(c, _)| port_is_egress_in_path(state, c, node, port))
        .count();
    debug!(%talker, node, port, streams, "port_will_see_bandwidth_change");
    match action {
        StreamAction::Connect => streams == 0,
        StreamAction::Disconnect => streams == 1,
    }
}

/// Whether `node` starts forwarding `connection`'s stream when it is made.
///
/// False when the connect is a no-op, or when some existing listener of the
/// same talker already sits beyond `node` on its path.
pub fn node_will_see_stream_enable(state: &State, connection: &Connection, node: &str) -> bool {
    if state.is_connected(connection) || state.listener_active_count(&connection.listener) > 0 {
        debug!(node, %connection, "no forward enable: connect is a no-op");
        return false;
    }
    let beyond = served_beyond(state, &connection.talker, node, None);
    debug!(node, %connection, beyond, "node_will_see_stream_enable");
    !beyond
}

/// Whether `node` stops forwarding `connection`'s stream when it is torn
/// down, ignoring the connection's own listener.
pub fn node_will_see_stream_disable(state: &State, connection: &Connection, node: &str) -> bool {
    if !state.is_connected(connection) {
        debug!(node, %connection, "no forward disable: not connected");
        return false;
    }
    let beyond = served_beyond(state, &connection.talker, node, Some(connection.dst()));
    debug!(node, %connection, beyond, "node_will_see_stream_disable");
    !beyond
}

fn served_beyond(state: &State, talker: &Talker, node: &str, ignore: Option<&str>) -> bool {
    for (connection, _) in state.connections() {
        if connection.talker != *talker {
            continue;
        }
        let Some(path) = find_path(state, &talker.src, connection.dst()) else {
            continue;
        };
        let mut past_node = false;
        for n in &path {
            if ignore == Some(n.as_str()) {
                continue;
            }
            if past_node {
                if state.connected(talker, n, None) {
                    return true;
                }
            } else if n == node {
                past_node = true;
            }
        }
    }
    false
}

/// Endpoints reachable from `node` over closed relays.
pub fn get_endpoints_connected_to(state: &State, node: &str) -> BTreeSet<String> {
    let connected: BTreeSet<String> = state
        .topology()
        .endpoints()
        .filter(|ep| find_path(state, node, &ep.name).is_some())
        .map(|ep| ep.name.clone())
        .collect();
    debug!(node, ?connected, "get_endpoints_connected_to");
    connected
}

/// Qav analyzers on `connection`'s path, each paired with the bandwidth the
/// stream occupies on that link.
pub fn qav_analyzers_on_path(state: &State, connection: &Connection) -> Vec<(String, u64)> {
    let topology = state.topology();
    let Some(path) = find_path(state, connection.src(), connection.dst()) else {
        return Vec::new();
    };
    let Some(talker_ep) = topology.endpoint(connection.src()) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for (index, node) in path.iter().enumerate() {
        let is_qav = topology
            .analyzer(node)
            .is_some_and(|a| a.kind == AnalyzerKind::Qav);
        if !is_qav {
            continue;
        }
        // The stream enters the link from the nearest endpoint upstream.
        let feeder = path[..index]
            .iter()
            .rev()
            .find(|n| topology.is_endpoint(n))
            .map_or(connection.src(), String::as_str);
        found.push((
            node.clone(),
            avb1722::stream_bandwidth(talker_ep, feeder != connection.src()),
        ));
    }
    found
}

/// Whether the stream of `talker` appears on (connect) or disappears from
/// (disconnect) the link monitored by `analyzer`.
pub fn link_will_see_stream_change(
    state: &State,
    talker: &Talker,
    analyzer: &str,
    action: StreamAction,
) -> bool {
    let crossing = state
        .connections()
        .filter(|(c, _)| c.talker == *talker)
        .filter(|(c, _)| {
            find_path(state, c.src(), c.dst()).is_some_and(|p| p.iter().any(|n| n == analyzer))
        })
        .count();
    match action {
        StreamAction::Connect => crossing == 0,
        StreamAction::Disconnect => crossing == 1,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::topology::Links;

    fn links(pairs: &[(&str, &[&str])]) -> Links {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.iter().map(|s| (*s).to_owned()).collect()))
            .collect()
    }

    fn state_with(links: Links) -> State {
        let mut topo = Topology::new("ci", "ctl");
        topo.set_links(links);
        State::new(Arc::new(topo))
    }

    #[test]
    fn dfs_takes_first_declared_neighbour() {
        // a reaches d both via b and via c; b is declared first.
        let state = state_with(links(&[
            ("a", &["b", "c"]),
            ("b", &["a", "d"]),
            ("c", &["a", "d"]),
            ("d", &["b", "c"]),
        ]));
        assert_eq!(find_path(&state, "a", "d").unwrap_or_default(), ["a", "b", "d"]);
    }

    #[test]
    fn open_relay_reroutes_or_disconnects() {
        let mut state = state_with(links(&[
            ("a", &["b", "c"]),
            ("b", &["a", "d"]),
            ("c", &["a", "d"]),
            ("d", &["b", "c"]),
        ]));
        state.set_relay_open("b");
        assert_eq!(find_path(&state, "a", "d").unwrap_or_default(), ["a", "c", "d"]);
        state.set_relay_open("c");
        assert_eq!(find_path(&state, "a", "d"), None);
        // A gated start still reaches itself.
        assert_eq!(find_path(&state, "b", "b").unwrap_or_default(), ["b"]);
        assert_eq!(find_path(&state, "b", "d"), None);
    }

    #[test]
    fn unknown_start_has_no_path() {
        let state = state_with(links(&[("a", &["b"]), ("b", &["a"])]));
        assert_eq!(find_path(&state, "zz", "a"), None);
    }

    #[test]
    fn forward_port_reads_last_character() {
        let state = state_with(links(&[
            ("dc0", &["dc0_1"]),
            ("dc0_1", &["dc0", "dc1_0"]),
            ("dc1_0", &["dc0_1", "dc1"]),
            ("dc1", &["dc1_0"]),
        ]));
        assert_eq!(get_forward_port(&state, "dc0", "dc1", "dc0"), Some(1));
        assert_eq!(get_forward_port(&state, "dc0", "dc1", "dc1_0"), Some(1));
        assert_eq!(get_forward_port(&state, "dc0", "dc1", "dc1"), None);
        assert_eq!(get_forward_port(&state, "dc0", "dc1", "nowhere"), None);
    }
}

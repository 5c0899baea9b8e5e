// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Expectation compiler: outcome classifications → expectation trees.
//!
//! Every function returns a list of trees so callers can concatenate the
//! contributions of several participants before wrapping them in a
//! combinator. An empty list means nothing observable happens.
//!
//! The patterns are the exact lines the endpoint firmware, the controller and
//! the analyzers print. They are regular expressions; values interpolated
//! into them are plain identifiers or numbers unless escaped explicitly.

use crate::expect::{Expectation, Expected, Hook, Watch};
use crate::graph;
use crate::ident::{Connection, StreamIndex, Talker};
use crate::model::{Analyzer, Descriptors, Endpoint};
use crate::state::{ControllerOutcome, ListenerOutcome, State, StreamAction, TalkerOutcome};
use crate::topology::Topology;

/// Default leaf timeout, seconds.
pub const STEP_TIMEOUT: u64 = 10;
/// Timeout for clock-source and ping confirmations, seconds.
pub const SHORT_TIMEOUT: u64 = 5;
/// Timeout for a listener to start receiving, seconds.
pub const LISTENER_CONNECT_TIMEOUT: u64 = 30;
/// Timeout for ADP to age out an unreachable entity, seconds.
pub const ENTITY_TIMEOUT: u64 = 30;
/// Timeout for discovery to settle, seconds.
pub const DISCOVER_TIMEOUT: u64 = 15;
/// Window in which a redundant connect must not disturb media lock, seconds.
pub const REDUNDANT_WINDOW: u64 = 2;

/// Timeout for an endpoint to settle a PTP port role after boot, seconds.
pub const PTP_ROLE_TIMEOUT: u64 = 40;
/// Timeout for MAAP to hand out a talker stream address after boot, seconds.
pub const MAAP_TIMEOUT: u64 = 40;
/// Timeout for analyzer connection and configuration replies, seconds.
pub const ANALYZER_TIMEOUT: u64 = 15;

/// Pattern the controller prints when an AECP command goes unanswered.
pub const CONTROLLER_TIMEOUT_PATTERN: &str = "Command timed out";

/// Talker-side lines for a connect/disconnect.
///
/// `first_activation` is true when the talker endpoint has never been
/// switched on before; only then does the firmware announce the stream ready.
pub fn talker_seq(
    talker: &Talker,
    outcome: TalkerOutcome,
    action: StreamAction,
    first_activation: bool,
) -> Vec<Expectation> {
    let src = talker.src.as_str();
    let n = talker.src_stream;
    let connecting = || Expectation::expected(src, format!("CONNECTING Talker stream #{n}"), STEP_TIMEOUT);
    let disconnecting =
        || Expectation::expected(src, format!("DISCONNECTING Talker stream #{n}"), STEP_TIMEOUT);
    let ready = || Expectation::expected(src, format!("Talker stream #{n} ready"), STEP_TIMEOUT);
    let on = || Expectation::expected(src, format!("Talker stream #{n} on"), STEP_TIMEOUT);
    let off = || Expectation::expected(src, format!("Talker stream #{n} off"), STEP_TIMEOUT);

    match (outcome, action) {
        (TalkerOutcome::New, _) => {
            let mut steps = vec![connecting()];
            if first_activation {
                steps.push(ready());
            }
            steps.push(on());
            vec![Expectation::Sequence(steps)]
        }
        (TalkerOutcome::Existing, StreamAction::Connect) => {
            vec![Expectation::Sequence(vec![connecting()])]
        }
        (TalkerOutcome::AllOff, _) => vec![Expectation::Sequence(vec![disconnecting(), off()])],
        (TalkerOutcome::Existing, StreamAction::Disconnect) => vec![Expectation::Sequence(vec![
            disconnecting(),
            Expectation::NoneOf(vec![ready(), off()]),
        ])],
        (TalkerOutcome::Redundant, _) => Vec::new(),
    }
}

/// Listener-side lines for a connect/disconnect.
pub fn listener_seq(
    listener_ep: &Endpoint,
    dst_stream: StreamIndex,
    outcome: ListenerOutcome,
    action: StreamAction,
) -> Vec<Expectation> {
    let dst = listener_ep.name.as_str();
    let lost_lock = |secs| Expectation::expected(dst, r"Media output \d+ lost lock", secs);
    match (outcome, action) {
        (ListenerOutcome::Active, StreamAction::Connect) => {
            let channels = 0..listener_ep.in_channels;
            vec![Expectation::Sequence(vec![
                Expectation::expected(
                    dst,
                    format!("CONNECTING Listener sink #{dst_stream}"),
                    LISTENER_CONNECT_TIMEOUT,
                ),
                Expectation::AllOf(
                    channels
                        .clone()
                        .map(|c| Expectation::expected(dst, format!("{c} -> {c}"), STEP_TIMEOUT))
                        .collect(),
                ),
                Expectation::AllOf(
                    channels
                        .map(|c| {
                            Expectation::expected(dst, format!("Media output {c} locked"), STEP_TIMEOUT)
                        })
                        .collect(),
                ),
                Expectation::NoneOf(vec![lost_lock(STEP_TIMEOUT)]),
            ])]
        }
        (ListenerOutcome::Active, StreamAction::Disconnect) => vec![Expectation::expected(
            dst,
            format!("DISCONNECTING Listener sink #{dst_stream}"),
            STEP_TIMEOUT,
        )],
        (ListenerOutcome::Redundant, StreamAction::Connect) => {
            vec![Expectation::NoneOf(vec![lost_lock(REDUNDANT_WINDOW)])]
        }
        (ListenerOutcome::Redundant, StreamAction::Disconnect) => Vec::new(),
    }
}

/// Controller answer for a connect/disconnect.
pub fn controller_seq(controller: &str, outcome: ControllerOutcome) -> Vec<Expectation> {
    match outcome {
        ControllerOutcome::Success => vec![success(controller, STEP_TIMEOUT)],
        ControllerOutcome::ListenerExclusive => vec![Expectation::expected(
            controller,
            "Failed with status LISTENER_EXCLUSIVE",
            STEP_TIMEOUT,
        )],
        ControllerOutcome::Timeout => vec![Expectation::expected(
            controller,
            CONTROLLER_TIMEOUT_PATTERN,
            STEP_TIMEOUT,
        )],
        ControllerOutcome::Redundant => Vec::new(),
    }
}

fn success(controller: &str, secs: u64) -> Expectation {
    Expectation::expected(controller, "Success", secs)
}

/// The glitch watch for channel `channel` of `analyzer`.
pub fn glitch_watch(analyzer: &str, channel: u32) -> Watch {
    Watch::new(analyzer, format!("Channel {channel}: Glitch detected"))
}

/// Analyzer lines when `connection`'s listener starts receiving: one
/// detected sine per listener channel, each arming that channel's glitch
/// watch.
pub fn analyzer_listener_connect_seq(topology: &Topology, connection: &Connection) -> Vec<Expectation> {
    let (Some(talker_ep), Some(listener_ep)) = (
        topology.endpoint(connection.src()),
        topology.endpoint(connection.dst()),
    ) else {
        return Vec::new();
    };
    let generator = topology.analyzer_for(talker_ep);
    (0..listener_ep.in_channels)
        .map(|n| {
            let channel = listener_ep.analyzer_offset + n;
            let frequency = generator
                .and_then(|g| g.siggen_frequency(talker_ep.analyzer_offset, n))
                .map_or_else(|| r"\d+".to_owned(), |f| f.to_string());
            Expectation::Expected(
                Expected::new(
                    &listener_ep.analyzer,
                    format!("Channel {channel}: Signal detected at {frequency} Hz"),
                    STEP_TIMEOUT,
                )
                .with_hook(Hook::Arm(glitch_watch(&listener_ep.analyzer, channel))),
            )
        })
        .collect()
}

/// Analyzer lines when `connection`'s listener stops receiving.
pub fn analyzer_listener_disconnect_seq(
    topology: &Topology,
    connection: &Connection,
) -> Vec<Expectation> {
    let Some(listener_ep) = topology.endpoint(connection.dst()) else {
        return Vec::new();
    };
    (0..listener_ep.in_channels)
        .map(|n| {
            let channel = listener_ep.analyzer_offset + n;
            Expectation::Expected(
                Expected::new(
                    &listener_ep.analyzer,
                    format!("Channel {channel}: Lost signal"),
                    STEP_TIMEOUT,
                )
                .with_hook(Hook::Disarm(glitch_watch(&listener_ep.analyzer, channel))),
            )
        })
        .collect()
}

/// Audio analyzer lines for a listener outcome.
pub fn analyzer_seq(
    topology: &Topology,
    connection: &Connection,
    outcome: ListenerOutcome,
    action: StreamAction,
) -> Vec<Expectation> {
    match (outcome, action) {
        (ListenerOutcome::Active, StreamAction::Connect) => {
            analyzer_listener_connect_seq(topology, connection)
        }
        (ListenerOutcome::Active, StreamAction::Disconnect) => {
            analyzer_listener_disconnect_seq(topology, connection)
        }
        (ListenerOutcome::Redundant, _) => Vec::new(),
    }
}

/// Traffic-analyzer reports for every qav analyzer on `connection`'s path
/// whose link gains (connect) or loses (disconnect) the talker's stream.
/// Predicates are evaluated on `pre`, the registry before the action.
pub fn analyzer_qav_seq(pre: &State, connection: &Connection, action: StreamAction) -> Vec<Expectation> {
    let topology = pre.topology();
    let Some(stream_id) = topology.stream_id(connection.src(), connection.talker.src_stream) else {
        return Vec::new();
    };
    graph::qav_analyzers_on_path(pre, connection)
        .into_iter()
        .filter(|(analyzer, _)| {
            graph::link_will_see_stream_change(pre, &connection.talker, analyzer, action)
        })
        .map(|(analyzer, bandwidth)| {
            let pattern = match action {
                StreamAction::Connect => format!("Stream {stream_id} bandwidth {bandwidth} bps"),
                StreamAction::Disconnect => format!("Stream {stream_id} removed"),
            };
            Expectation::expected(analyzer, pattern, STEP_TIMEOUT)
        })
        .collect()
}

/// 1722 router line on forwarding node `node` for the talker's stream.
pub fn stream_forward_seq(
    topology: &Topology,
    node: &str,
    talker: &Talker,
    action: StreamAction,
) -> Vec<Expectation> {
    let Some(stream_id) = topology.stream_id(&talker.src, talker.src_stream) else {
        return Vec::new();
    };
    let verb = match action {
        StreamAction::Connect => "Enabled",
        StreamAction::Disconnect => "Disabled",
    };
    vec![Expectation::expected(
        node,
        format!("1722 router: {verb} forwarding for stream {stream_id}"),
        STEP_TIMEOUT,
    )]
}

/// Shaper reconfiguration lines on `node` for `connection`.
///
/// A line is expected for every port of `node` that egresses the
/// connection's path and whose reserved bandwidth changes; the change
/// predicate runs on `pre`, the announced value is computed on `post`.
pub fn port_shaper_seq(
    pre: &State,
    post: &State,
    node: &Endpoint,
    connection: &Connection,
    action: StreamAction,
) -> Vec<Expectation> {
    (0..node.ports)
        .filter(|port| graph::port_is_egress_in_path(pre, connection, &node.name, *port))
        .filter(|port| {
            graph::port_will_see_bandwidth_change(pre, &connection.talker, &node.name, *port, action)
        })
        .map(|port| {
            let bandwidth = graph::calculate_expected_bandwidth(post, &node.name, port);
            Expectation::expected(
                &node.name,
                format!("Port {port} shaper bandwidth {bandwidth} bps"),
                STEP_TIMEOUT,
            )
        })
        .collect()
}

/// Any shaper line on `node`, for use under `NoneOf`.
pub fn any_port_shaper_seq(node: &str) -> Vec<Expectation> {
    vec![Expectation::expected(
        node,
        r"Port \d+ shaper bandwidth \d+ bps",
        STEP_TIMEOUT,
    )]
}

/// Controller ack and endpoint line for a clock source change.
pub fn clock_source_seq(controller: &str, endpoint: &str, master: bool) -> Vec<Expectation> {
    let source = if master {
        "LOCAL_CLOCK"
    } else {
        "INPUT_STREAM_DERIVED"
    };
    vec![
        success(controller, SHORT_TIMEOUT),
        Expectation::expected(
            endpoint,
            format!("Setting clock source: {source}"),
            SHORT_TIMEOUT,
        ),
    ]
}

fn descriptor_kind(key: &str) -> String {
    // Drop the first `<digits>_` group: `0_ENTITY` → `ENTITY`.
    let Some(underscore) = key.find('_') else {
        return key.to_owned();
    };
    let start = key[..underscore]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map_or(underscore, |(i, _)| i);
    format!("{}{}", &key[..start], &key[underscore + 1..])
}

/// Controller output while enumerating an endpoint, in descriptor order.
pub fn controller_enumerate_seq(controller: &str, descriptors: &Descriptors) -> Expectation {
    let mut steps = Vec::new();
    for (key, objects) in descriptors {
        steps.push(Expectation::expected(
            controller,
            format!("AVB 1722.1 {} ", regex::escape(&descriptor_kind(key))),
            STEP_TIMEOUT,
        ));
        for (name, items) in objects {
            steps.push(Expectation::expected(
                controller,
                format!(r"object_name\s*=\s*'{}'", regex::escape(name)),
                STEP_TIMEOUT,
            ));
            for item in items {
                steps.push(Expectation::expected(
                    controller,
                    format!(
                        r"{}\s*=\s*{}",
                        regex::escape(&item.item),
                        regex::escape(&item.value_text())
                    ),
                    STEP_TIMEOUT,
                ));
            }
        }
    }
    Expectation::Sequence(steps)
}

/// Endpoint identify and controller ack.
pub fn ping_seq(controller: &str, endpoint: &str) -> Vec<Expectation> {
    vec![
        Expectation::expected(endpoint, "IDENTIFY Ping", SHORT_TIMEOUT),
        success(controller, SHORT_TIMEOUT),
    ]
}

/// Discovery summary line.
pub fn discover_seq(controller: &str, entities: usize) -> Expectation {
    Expectation::expected(
        controller,
        format!("Found {entities} entities"),
        DISCOVER_TIMEOUT,
    )
}

/// `show connections` output for the registry's live connections, or a
/// guard that no connection line appears when there are none.
pub fn check_connections_seq(controller: &str, state: &State) -> Expectation {
    let topology = state.topology();
    let lines: Vec<Expectation> = state
        .connections()
        .filter_map(|(c, _)| {
            let src = topology.avb_id(c.src())?;
            let dst = topology.avb_id(c.dst())?;
            Some(Expectation::expected(
                controller,
                format!(
                    r"0x{src}\[{}\] -> 0x{dst}\[{}\]",
                    c.talker.src_stream, c.listener.dst_stream
                ),
                STEP_TIMEOUT,
            ))
        })
        .collect();
    if lines.is_empty() {
        Expectation::NoneOf(vec![Expectation::expected(controller, "->", SHORT_TIMEOUT)])
    } else {
        Expectation::AllOf(lines)
    }
}

/// Listener line when ADP ages out a talker behind an opened relay.
pub fn entity_lost_seq(listener: &str) -> Expectation {
    Expectation::expected(
        listener,
        "ADP: Removing entity who timed out -> GUID",
        ENTITY_TIMEOUT,
    )
}

/// Talker line when its stream stops for lack of listeners.
pub fn talker_off_seq(talker: &Talker, secs: u64) -> Expectation {
    Expectation::expected(
        &talker.src,
        format!("Talker stream #{} off", talker.src_stream),
        secs,
    )
}

/// PTP role changes an endpoint prints after boot.
///
/// Every port starts as master. A non-grandmaster then takes the slave role
/// on one port and locks; on a dual-port endpoint the lock waits on every
/// endpoint in the chain.
pub fn ptp_startup_seq(endpoint: &Endpoint, grandmaster: bool, endpoints: usize) -> Expectation {
    let name = endpoint.name.as_str();
    let (mut steps, slave, lock_secs) = if endpoint.is_dual_port() {
        (
            vec![
                Expectation::expected(name, "PTP Port 0 Role: Master", PTP_ROLE_TIMEOUT),
                Expectation::expected(name, "PTP Port 1 Role: Master", SHORT_TIMEOUT),
            ],
            r"PTP Port \d+ Role: Slave",
            u64::try_from(endpoints).unwrap_or(u64::MAX).saturating_mul(3),
        )
    } else {
        (
            vec![Expectation::expected(name, "PTP Role: Master", PTP_ROLE_TIMEOUT)],
            "PTP Role: Slave",
            SHORT_TIMEOUT,
        )
    };
    if !grandmaster {
        steps.push(Expectation::Sequence(vec![
            Expectation::expected(name, slave, PTP_ROLE_TIMEOUT),
            Expectation::expected(name, "PTP sync locked", lock_secs),
        ]));
    }
    Expectation::Sequence(steps)
}

/// One MAAP reservation per talker stream the firmware declares.
pub fn maap_seq(endpoint: &Endpoint) -> Expectation {
    Expectation::AllOf(
        (0..endpoint.talker_streams)
            .map(|n| {
                Expectation::expected(
                    &endpoint.name,
                    format!("MAAP reserved Talker stream #{n} address: 91:E0:F0:0"),
                    MAAP_TIMEOUT,
                )
            })
            .collect(),
    )
}

/// Analyzer host tool reporting it reached its target.
pub fn analyzer_connected_seq(analyzer: &Analyzer) -> Expectation {
    Expectation::expected(
        &analyzer.name,
        format!("connected to .*: {}", analyzer.port),
        ANALYZER_TIMEOUT,
    )
}

/// Reply to `d a`: the first channel reports disabled.
pub fn analyzer_disabled_seq(analyzer: &Analyzer) -> Expectation {
    Expectation::expected(&analyzer.name, "Channel 0: disabled", ANALYZER_TIMEOUT)
}

/// Reply to `c <chan> <freq>`; the generator numbers channels from its base.
pub fn sine_table_seq(analyzer: &Analyzer, channel: u32) -> Expectation {
    Expectation::expected(
        &analyzer.name,
        format!(
            "Generating sine table for chan {}",
            channel.saturating_sub(analyzer.base)
        ),
        ANALYZER_TIMEOUT,
    )
}

/// Reply to `e a`: every configured channel reports enabled.
pub fn analyzer_enabled_seq(analyzer: &Analyzer) -> Expectation {
    Expectation::AllOf(
        analyzer
            .frequencies
            .keys()
            .map(|c| {
                Expectation::expected(
                    &analyzer.name,
                    format!("Channel {}: enabled", c.saturating_sub(analyzer.base)),
                    ANALYZER_TIMEOUT,
                )
            })
            .collect(),
    )
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ASCII wiring diagram of a registry generation.
//!
//! Endpoints are drawn down the left, five lines each (frame, talker out,
//! name, listener in, frame) with a blank line between them. Each talker
//! gets a vertical lane to the right, indexed by the talker's position in
//! the endpoint list; `-+` marks where a talker leaves or a listener joins
//! its lane. Clock source masters are framed with `*======*`.

use std::collections::BTreeSet;

use crate::state::State;

const FRAME: &str = " +======+ ";
const MASTER_FRAME: &str = " *======* ";
const SIDE: &str = " |      | ";

fn connection_line(names: &[String], lane: usize, active: &BTreeSet<String>) -> String {
    let mut line = String::new();
    let mut connect = '-';
    for (i, name) in names.iter().enumerate() {
        if i == lane {
            line.push_str("-+");
            connect = ' ';
        } else if active.contains(name) {
            line.push(connect);
            line.push('|');
        } else {
            line.push(connect);
            line.push(connect);
        }
    }
    line
}

fn non_connection_line(names: &[String], active: &BTreeSet<String>) -> String {
    names
        .iter()
        .map(|name| if active.contains(name) { " |" } else { "  " })
        .collect()
}

fn max_listener_index(state: &State, names: &[String], talker: &str) -> usize {
    state
        .connections()
        .filter(|(c, _)| c.src() == talker)
        .filter_map(|(c, _)| names.iter().position(|n| n == c.dst()))
        .max()
        .unwrap_or(0)
}

fn talker_for_listener<'a>(state: &'a State, listener: &str) -> Option<&'a str> {
    state
        .connections()
        .find(|(c, _)| c.dst() == listener)
        .map(|(c, _)| c.src())
}

/// Renders the registry as text lines, one endpoint block per name in
/// `names`, top to bottom.
pub fn draw_state(state: &State, names: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut active: BTreeSet<String> = BTreeSet::new();
    for (num, name) in names.iter().enumerate() {
        let frame = if state.is_clock_source_master(name) {
            MASTER_FRAME
        } else {
            FRAME
        };
        if num > 0 {
            lines.push(format!("{:10}  {}", "", non_connection_line(names, &active)));
        }
        lines.push(format!("{frame}  {}", non_connection_line(names, &active)));

        let talking = state.talkers().any(|(t, _)| t.src == *name);
        if talking {
            if max_listener_index(state, names, name) > num {
                active.insert(name.clone());
            } else {
                active.remove(name);
            }
            lines.push(format!("{SIDE}--{}", connection_line(names, num, &active)));
        } else {
            lines.push(format!("{SIDE}  {}", non_connection_line(names, &active)));
        }

        lines.push(format!(" | {name:<4} |   {}", non_connection_line(names, &active)));

        match talker_for_listener(state, name)
            .and_then(|t| names.iter().position(|n| n == t).map(|i| (t, i)))
        {
            Some((talker, lane)) => {
                if lane > num {
                    active.insert(talker.to_owned());
                } else if max_listener_index(state, names, talker) <= num {
                    active.remove(talker);
                }
                lines.push(format!("{SIDE}<-{}", connection_line(names, lane, &active)));
            }
            None => lines.push(format!("{SIDE}  {}", non_connection_line(names, &active))),
        }

        lines.push(format!("{frame}  {}", non_connection_line(names, &active)));
    }
    lines
}

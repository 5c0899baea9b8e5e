// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Test actions, parsed from plan command strings.
//!
//! Commands are whitespace-separated: a verb followed by positional
//! arguments. Parsing happens when the plan is loaded so a typo fails the run
//! before anything is sent to the rig.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PlanError;
use crate::ident::Connection;

/// One step of a test plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `connect <src> <src_stream> <dst> <dst_stream>`
    Connect(Connection),
    /// `disconnect <src> <src_stream> <dst> <dst_stream>`
    Disconnect(Connection),
    /// `enumerate <endpoint>`
    Enumerate {
        /// Endpoint to enumerate.
        endpoint: String,
    },
    /// `discover`
    Discover,
    /// `ping <endpoint>`
    Ping {
        /// Endpoint to identify.
        endpoint: String,
    },
    /// `link_up <analyzer>`: close the analyzer's relay.
    LinkUp {
        /// Relay analyzer.
        analyzer: String,
    },
    /// `link_down <analyzer>`: open the analyzer's relay.
    LinkDown {
        /// Relay analyzer.
        analyzer: String,
    },
    /// `link_downup <analyzer> <secs>`: open the relay, hold, close it again.
    LinkDownUp {
        /// Relay analyzer.
        analyzer: String,
        /// How long the link stays down.
        hold: Duration,
    },
    /// `sleep <secs>`
    Sleep(Duration),
    /// `check_connections`
    CheckConnections,
    /// `continue`: no-op, used to close a batch.
    Continue,
}

fn arity(verb: &str, args: &[&str], expected: usize) -> Result<(), PlanError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(PlanError::Arity {
            verb: verb.to_owned(),
            expected,
            found: args.len(),
        })
    }
}

fn number<T: FromStr>(verb: &str, value: &str) -> Result<T, PlanError> {
    value.parse().map_err(|_| PlanError::BadNumber {
        verb: verb.to_owned(),
        value: value.to_owned(),
    })
}

fn connection(verb: &str, args: &[&str]) -> Result<Connection, PlanError> {
    arity(verb, args, 4)?;
    Ok(Connection::new(
        args[0],
        number(verb, args[1])?,
        args[2],
        number(verb, args[3])?,
    ))
}

impl FromStr for Action {
    type Err = PlanError;

    fn from_str(command: &str) -> Result<Self, Self::Err> {
        let mut words = command.split_whitespace();
        let verb = words.next().ok_or(PlanError::EmptyCommand)?;
        let args: Vec<&str> = words.collect();
        let action = match verb {
            "connect" => Self::Connect(connection(verb, &args)?),
            "disconnect" => Self::Disconnect(connection(verb, &args)?),
            "enumerate" => {
                arity(verb, &args, 1)?;
                Self::Enumerate {
                    endpoint: args[0].to_owned(),
                }
            }
            "discover" => {
                arity(verb, &args, 0)?;
                Self::Discover
            }
            "ping" => {
                arity(verb, &args, 1)?;
                Self::Ping {
                    endpoint: args[0].to_owned(),
                }
            }
            "link_up" => {
                arity(verb, &args, 1)?;
                Self::LinkUp {
                    analyzer: args[0].to_owned(),
                }
            }
            "link_down" => {
                arity(verb, &args, 1)?;
                Self::LinkDown {
                    analyzer: args[0].to_owned(),
                }
            }
            "link_downup" => {
                arity(verb, &args, 2)?;
                Self::LinkDownUp {
                    analyzer: args[0].to_owned(),
                    hold: Duration::from_secs(number(verb, args[1])?),
                }
            }
            "sleep" => {
                arity(verb, &args, 1)?;
                Self::Sleep(Duration::from_secs(number(verb, args[0])?))
            }
            "check_connections" => {
                arity(verb, &args, 0)?;
                Self::CheckConnections
            }
            "continue" => {
                arity(verb, &args, 0)?;
                Self::Continue
            }
            other => return Err(PlanError::UnknownVerb(other.to_owned())),
        };
        Ok(action)
    }
}

impl Action {
    /// Plan verb for this action.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Enumerate { .. } => "enumerate",
            Self::Discover => "discover",
            Self::Ping { .. } => "ping",
            Self::LinkUp { .. } => "link_up",
            Self::LinkDown { .. } => "link_down",
            Self::LinkDownUp { .. } => "link_downup",
            Self::Sleep(_) => "sleep",
            Self::CheckConnections => "check_connections",
            Self::Continue => "continue",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())?;
        match self {
            Self::Connect(c) | Self::Disconnect(c) => write!(
                f,
                " {} {} {} {}",
                c.talker.src, c.talker.src_stream, c.listener.dst, c.listener.dst_stream
            ),
            Self::Enumerate { endpoint } | Self::Ping { endpoint } => write!(f, " {endpoint}"),
            Self::LinkUp { analyzer } | Self::LinkDown { analyzer } => write!(f, " {analyzer}"),
            Self::LinkDownUp { analyzer, hold } => write!(f, " {analyzer} {}", hold.as_secs()),
            Self::Sleep(d) => write!(f, " {}", d.as_secs()),
            Self::Discover | Self::CheckConnections | Self::Continue => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn parses_every_verb() {
        let cases = [
            "connect dc0 0 dc1 0",
            "disconnect dc1 1 dc2 0",
            "enumerate dc0",
            "discover",
            "ping dc3",
            "link_up relay0",
            "link_down relay0",
            "link_downup relay0 5",
            "sleep 2",
            "check_connections",
            "continue",
        ];
        for command in cases {
            let action: Action = command.parse().unwrap();
            assert_eq!(action.to_string(), command);
        }
    }

    #[test]
    fn extra_whitespace_is_ignored() {
        let action: Action = "  connect   dc0 0\tdc1 1 ".parse().unwrap();
        assert_eq!(action, Action::Connect(Connection::new("dc0", 0, "dc1", 1)));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(matches!("".parse::<Action>(), Err(PlanError::EmptyCommand)));
        assert!(matches!(
            "teleport dc0".parse::<Action>(),
            Err(PlanError::UnknownVerb(v)) if v == "teleport"
        ));
        assert!(matches!(
            "connect dc0 0 dc1".parse::<Action>(),
            Err(PlanError::Arity { expected: 4, found: 3, .. })
        ));
        assert!(matches!(
            "connect dc0 x dc1 0".parse::<Action>(),
            Err(PlanError::BadNumber { value, .. }) if value == "x"
        ));
        assert!(matches!(
            "sleep -1".parse::<Action>(),
            Err(PlanError::BadNumber { .. })
        ));
        assert!(matches!(
            "discover now".parse::<Action>(),
            Err(PlanError::Arity { expected: 0, .. })
        ));
    }
}

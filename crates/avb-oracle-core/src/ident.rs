// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Value identities for talker streams, listener sinks and the connections
//! between them.
//!
//! All three types compare, order and hash by their fields. The registry keys
//! its `BTreeMap`s on them, so the derived `Ord` fixes iteration order for
//! every prediction the oracle makes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a stream on an endpoint (talker stream or listener sink).
pub type StreamIndex = u32;

/// A talker stream: `(source endpoint, stream index)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Talker {
    /// Name of the endpoint sourcing the stream.
    pub src: String,
    /// Stream index on the source endpoint.
    pub src_stream: StreamIndex,
}

impl Talker {
    /// Creates a talker identity.
    pub fn new(src: impl Into<String>, src_stream: StreamIndex) -> Self {
        Self {
            src: src.into(),
            src_stream,
        }
    }
}

impl fmt::Display for Talker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.src, self.src_stream)
    }
}

/// A listener sink: `(destination endpoint, stream index)`.
///
/// A listener accepts at most one connection at a time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Listener {
    /// Name of the endpoint receiving the stream.
    pub dst: String,
    /// Sink index on the destination endpoint.
    pub dst_stream: StreamIndex,
}

impl Listener {
    /// Creates a listener identity.
    pub fn new(dst: impl Into<String>, dst_stream: StreamIndex) -> Self {
        Self {
            dst: dst.into(),
            dst_stream,
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dst, self.dst_stream)
    }
}

/// A talker→listener connection.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Connection {
    /// Stream source.
    pub talker: Talker,
    /// Stream sink.
    pub listener: Listener,
}

impl Connection {
    /// Creates a connection from its four coordinates.
    pub fn new(
        src: impl Into<String>,
        src_stream: StreamIndex,
        dst: impl Into<String>,
        dst_stream: StreamIndex,
    ) -> Self {
        Self {
            talker: Talker::new(src, src_stream),
            listener: Listener::new(dst, dst_stream),
        }
    }

    /// Source endpoint name.
    pub fn src(&self) -> &str {
        &self.talker.src
    }

    /// Destination endpoint name.
    pub fn dst(&self) -> &str {
        &self.listener.dst
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.talker, self.listener)
    }
}

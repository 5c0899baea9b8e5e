// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rig participants as declared by the topology config: endpoints under test
//! and the analyzers attached to them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-user hardware identifiers for one rig participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIds {
    /// AVB entity id (EUI-64, hex, no `0x` prefix).
    #[serde(default)]
    pub avb_id: String,
    /// Debug adapter the participant's firmware is launched through.
    #[serde(default)]
    pub xrun_adapter_id: String,
}

/// One `item = value` line the controller prints while enumerating a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorItem {
    /// Field name as printed by the controller.
    pub item: String,
    /// Expected value; strings are matched verbatim, other JSON values by
    /// their JSON rendering.
    pub value: serde_json::Value,
}

impl DescriptorItem {
    /// Text the controller is expected to print for this value.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Enumeration metadata: descriptor kind key (e.g. `0_ENTITY`) → object name →
/// expected items.
pub type Descriptors = BTreeMap<String, BTreeMap<String, Vec<DescriptorItem>>>;

/// A device under test: talks and/or listens, and forwards when it has two ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique name; also the name of the endpoint's node in the adjacency.
    pub name: String,
    /// Number of Ethernet ports (1 or 2).
    pub ports: u8,
    /// Audio channels received per listener sink.
    #[serde(default)]
    pub in_channels: u32,
    /// Audio channels sent per talker stream.
    #[serde(default)]
    pub out_channels: u32,
    /// Number of talker streams the firmware reserves at boot.
    #[serde(default)]
    pub talker_streams: u32,
    /// Media clock rate in Hz.
    pub sample_rate: u32,
    /// Name of the audio analyzer wired to this endpoint's I/O.
    pub analyzer: String,
    /// Offset of this endpoint's channels on its analyzer.
    #[serde(default)]
    pub analyzer_offset: u32,
    /// Descriptors the controller reports on `enumerate`.
    #[serde(default)]
    pub descriptors: Descriptors,
    /// Hardware ids keyed by rig user.
    #[serde(default)]
    pub users: BTreeMap<String, UserIds>,
}

impl Endpoint {
    /// Whether the endpoint bridges traffic between two ports.
    pub fn is_dual_port(&self) -> bool {
        self.ports == 2
    }
}

/// What an analyzer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Signal generator/checker wired to endpoint audio I/O.
    Audio,
    /// Inline traffic monitor that reports per-stream bandwidth; also owns a
    /// link relay.
    Qav,
}

/// A passive signal or traffic analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    /// Unique name; also the process name its output is matched on.
    pub name: String,
    /// Host port the analyzer controller listens on.
    #[serde(default)]
    pub port: u16,
    /// Analyzer flavour.
    #[serde(rename = "type")]
    pub kind: AnalyzerKind,
    /// Index of the first generator channel.
    #[serde(default)]
    pub base: u32,
    /// Sine frequency (Hz) generated on each absolute channel index.
    #[serde(default)]
    pub frequencies: BTreeMap<u32, u32>,
    /// Hardware ids keyed by rig user.
    #[serde(default)]
    pub users: BTreeMap<String, UserIds>,
}

impl Analyzer {
    /// Frequency generated for channel `channel` of a talker whose channels
    /// start at `offset` on this analyzer.
    pub fn siggen_frequency(&self, offset: u32, channel: u32) -> Option<u32> {
        self.frequencies
            .get(&(self.base + offset + channel))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn endpoint_decodes_from_rig_json() {
        let ep: Endpoint = serde_json::from_str(
            r#"{
                "name": "dc0", "ports": 2, "in_channels": 2, "out_channels": 2,
                "talker_streams": 1, "sample_rate": 48000,
                "analyzer": "analyzer0", "analyzer_offset": 0,
                "descriptors": {"0_ENTITY": {"dc0": [{"item": "entity_id", "value": "0x1"}]}},
                "users": {"ci": {"avb_id": "002297fffe000001", "xrun_adapter_id": "A1"}}
            }"#,
        )
        .unwrap();
        assert!(ep.is_dual_port());
        assert_eq!(ep.users["ci"].avb_id, "002297fffe000001");
        assert_eq!(ep.descriptors["0_ENTITY"]["dc0"][0].value_text(), "0x1");
    }

    #[test]
    fn siggen_frequency_is_offset_from_base() {
        let analyzer: Analyzer = serde_json::from_str(
            r#"{"name": "a0", "type": "audio", "base": 4,
                "frequencies": {"4": 1000, "5": 2000, "6": 3000}}"#,
        )
        .unwrap();
        assert_eq!(analyzer.kind, AnalyzerKind::Audio);
        assert_eq!(analyzer.siggen_frequency(1, 1), Some(3000));
        assert_eq!(analyzer.siggen_frequency(2, 1), None);
    }
}

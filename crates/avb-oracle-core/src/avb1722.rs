// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! IEEE 1722 per-stream bandwidth arithmetic.
//!
//! A stream is carried as one Ethernet frame per class-A interval. The
//! reservation covers the whole wire footprint of each frame: inter-frame
//! gap, preamble, Ethernet and VLAN headers, CRC, the 1722/SIP header and the
//! audio payload. Bridges reserve one extra byte per frame.

use crate::model::Endpoint;

/// Class-A packet rate.
pub const PACKETS_PER_SECOND: u64 = 8000;

/// Inter-frame gap.
pub const IFG_BYTES: u64 = 12;
/// Preamble and start-of-frame delimiter.
pub const PREAMBLE_BYTES: u64 = 8;
/// Ethernet header.
pub const ETHER_HEADER_BYTES: u64 = 14;
/// 802.1Q tag.
pub const VLAN_TAG_BYTES: u64 = 4;
/// Frame check sequence.
pub const CRC_BYTES: u64 = 4;
/// 1722 common stream header plus SIP header.
pub const AVB1722_HEADER_BYTES: u64 = 32;
/// Bytes per audio sample on the wire.
pub const BYTES_PER_SAMPLE: u64 = 4;

/// Fixed per-frame overhead excluding payload and the bridge byte.
pub const FRAME_OVERHEAD_BYTES: u64 = IFG_BYTES
    + PREAMBLE_BYTES
    + ETHER_HEADER_BYTES
    + VLAN_TAG_BYTES
    + CRC_BYTES
    + AVB1722_HEADER_BYTES;

/// Samples per channel carried in one packet, rounded up.
pub fn samples_per_packet(sample_rate: u32) -> u64 {
    u64::from(sample_rate).div_ceil(PACKETS_PER_SECOND)
}

/// Audio payload bytes per packet for a talker endpoint.
pub fn data_bytes_per_packet(talker: &Endpoint) -> u64 {
    samples_per_packet(talker.sample_rate) * BYTES_PER_SAMPLE * u64::from(talker.out_channels)
}

/// Bits per second one stream from `talker` occupies on a link.
///
/// `bridge` is set when the egress port belongs to a forwarding node rather
/// than the talker itself.
pub fn stream_bandwidth(talker: &Endpoint, bridge: bool) -> u64 {
    let frame_bytes = FRAME_OVERHEAD_BYTES + data_bytes_per_packet(talker) + u64::from(bridge);
    frame_bytes * 8 * PACKETS_PER_SECOND
}

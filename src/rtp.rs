// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use std::ops::Range;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};

use crate::Timestamp;

/// The minimum length of an RTP header (no CSRCs or extensions).
pub(crate) const MIN_HEADER_LEN: usize = 12;

/// Raw packet which has passed the checks needed before it can touch any
/// session state.
///
/// Only length, version, and padding are checked here. The CSRC list and header extension are only examined at dispatch time,
/// by [`RawPacket::payload_range`], so a packet with a bogus extension
/// still counts toward sequence and jitter tracking.
pub(crate) struct RawPacket(
    /// Packet data, including headers, with any padding already removed.
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |            contributing source (CSRC) identifiers             |
    /// |                             ....                              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub Bytes,
);

impl RawPacket {
    /// Validates the fixed header and strips padding.
    pub fn new(mut data: Bytes) -> Result<Self, RawPacketError> {
        if data.len() < MIN_HEADER_LEN {
            return Err(RawPacketError {
                reason: "too short",
                data,
            });
        }
        if (data[0] & 0b1100_0000) != 2 << 6 {
            return Err(RawPacketError {
                reason: "must be version 2",
                data,
            });
        }
        if (data[0] & 0b0010_0000) != 0 {
            let padding_len = usize::from(data[data.len() - 1]);
            if padding_len == 0 {
                return Err(RawPacketError {
                    reason: "invalid padding length 0",
                    data,
                });
            }
            if data.len() < MIN_HEADER_LEN + padding_len {
                return Err(RawPacketError {
                    reason: "padding larger than packet",
                    data,
                });
            }
            data.truncate(data.len() - padding_len);
        }
        Ok(Self(data))
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.0[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.0[1] & 0b0111_1111
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }

    /// Returns the range of the payload, skipping CSRCs and any header
    /// extension.
    pub fn payload_range(&self) -> Result<Range<usize>, &'static str> {
        let len = self.0.len();
        let mut skip = MIN_HEADER_LEN + 4 * usize::from(self.0[0] & 0b0000_1111);
        if (self.0[0] & 0b0001_0000) != 0 {
            skip += 4;
            if len < skip {
                return Err("extension header is after end of packet");
            }
            let words = u16::from_be_bytes([self.0[skip - 2], self.0[skip - 1]]);
            skip += 4 * usize::from(words);
        }
        if len < skip {
            return Err("payload start is after end of packet");
        }
        Ok(skip..len)
    }
}

impl std::fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPacket")
            .field("ssrc", &format_args!("{:08x}", self.ssrc()))
            .field("sequence_number", &self.sequence_number())
            .field("payload_type", &self.payload_type())
            .field("data", &crate::hex::LimitedHex::new(&self.0, 64))
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct RawPacketError {
    pub(crate) reason: &'static str,
    pub(crate) data: Bytes,
}

/// Builds simple RTP packets (no CSRCs, extension, or padding).
/// Testing API; exposed for benchmarks and fuzz tests.
#[doc(hidden)]
pub struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

impl RawPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(self, payload: P) -> Result<Bytes, &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let data: Bytes = [
            2 << 6, // version=2, no padding, no extensions, no CSRCs.
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]
        .into_iter()
        .chain(self.sequence_number.to_be_bytes())
        .chain(self.timestamp.to_be_bytes())
        .chain(self.ssrc.to_be_bytes())
        .chain(payload)
        .collect();
        if data.len() > usize::from(u16::MAX) {
            return Err("payload too long");
        }
        Ok(data)
    }
}

/// An RTP packet delivered in sequence order to a [`crate::Decoder`].
pub struct Packet {
    pub(crate) received: Instant,
    pub(crate) timestamp: Timestamp,
    pub(crate) pts: Duration,
    pub(crate) discontinuity: bool,
    pub(crate) raw: RawPacket,
    pub(crate) payload_range: Range<usize>,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("ssrc", &format_args!("{:08x}", self.raw.ssrc()))
            .field("sequence_number", &self.raw.sequence_number())
            .field("payload_type", &self.raw.payload_type())
            .field("timestamp", &self.timestamp)
            .field("pts", &self.pts)
            .field("discontinuity", &self.discontinuity)
            .field("mark", &self.raw.mark())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 64))
            .finish()
    }
}

impl Packet {
    /// Returns when the packet was received (not when it was dequeued).
    #[inline]
    pub fn received(&self) -> Instant {
        self.received
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.raw.ssrc()
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.raw.sequence_number()
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.raw.payload_type()
    }

    #[inline]
    pub fn mark(&self) -> bool {
        self.raw.mark()
    }

    /// Returns the 32-bit timestamp as seen in the RTP header.
    #[inline]
    pub fn rtp_timestamp(&self) -> u32 {
        self.raw.timestamp()
    }

    /// Returns the timestamp extended to 64 bits across wraparounds.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the presentation time: the 32-bit RTP timestamp divided by the
    /// payload type's clock rate.
    ///
    /// No decode timestamp is known; RTP doesn't carry one.
    #[inline]
    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// True if one or more packets before this one were lost or given up on,
    /// or the source resynchronized its sequence numbers.
    #[inline]
    pub fn is_discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Returns the raw bytes, including the RTP headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw.0[..]
    }

    /// Returns only the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.raw.0[self.payload_range.clone()]
    }

    /// Consumes the `Packet` and returns the payload as a [`Bytes`] without
    /// copying.
    #[inline]
    pub fn into_payload_bytes(self) -> Bytes {
        let mut data = self.raw.0;
        data.truncate(self.payload_range.end);
        data.advance(self.payload_range.start);
        data
    }
}

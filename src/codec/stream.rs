// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte streams for a chained demuxer, such as an MPEG-2 transport stream
//! ([RFC 2250 section 2](https://datatracker.ietf.org/doc/html/rfc2250#section-2)).
//! The payload is passed through untouched.

use super::{CodecItem, StreamChunk};
use crate::rtp::Packet;

#[derive(Debug, Default)]
pub(crate) struct Depacketizer {
    pending: Option<StreamChunk>,
}

impl Depacketizer {
    pub(super) fn push(&mut self, pkt: Packet) -> Result<(), String> {
        assert!(self.pending.is_none());
        self.pending = Some(StreamChunk {
            ssrc: pkt.ssrc(),
            pts: pkt.pts(),
            discontinuity: pkt.is_discontinuity(),
            data: pkt.into_payload_bytes(),
        });
        Ok(())
    }

    pub(super) fn pull(&mut self) -> Option<CodecItem> {
        self.pending.take().map(CodecItem::StreamChunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::delivered;

    #[test]
    fn passthrough() {
        let mut d = Depacketizer::default();
        let mut ts = vec![0x47u8];
        ts.extend_from_slice(&[0xff; 187]);
        d.push(delivered(33, 90_000, 1, 0, false, &ts)).unwrap();
        match d.pull() {
            Some(CodecItem::StreamChunk(c)) => assert_eq!(&c.data[..], &ts[..]),
            o => panic!("unexpected {:?}", o),
        }
        assert!(d.pull().is_none());
    }
}

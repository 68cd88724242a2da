// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MPEG-1/MPEG-2 audio and video elementary streams, as defined in
//! [RFC 2250 section 3](https://datatracker.ietf.org/doc/html/rfc2250#section-3).

use bytes::Buf;

use super::{AudioFrame, CodecItem, VideoFrame};
use crate::rtp::Packet;

/// Length of the MPEG-specific header that precedes every payload.
const HEADER_LEN: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Audio,
    Video,
}

#[derive(Debug)]
pub(crate) struct Depacketizer {
    kind: Kind,
    pending: Option<CodecItem>,
}

impl Depacketizer {
    pub(super) fn new(kind: Kind) -> Self {
        Depacketizer {
            kind,
            pending: None,
        }
    }

    pub(super) fn push(&mut self, pkt: Packet) -> Result<(), String> {
        assert!(self.pending.is_none());
        let payload = pkt.payload();
        if payload.len() < HEADER_LEN {
            return Err(format!(
                "{}-byte payload too short for MPEG header",
                payload.len()
            ));
        }
        let ssrc = pkt.ssrc();
        let timestamp = pkt.timestamp();
        let pts = pkt.pts();
        let discontinuity = pkt.is_discontinuity();
        self.pending = Some(match self.kind {
            Kind::Audio => {
                // MBZ (16 bits), fragment offset (16 bits).
                let mut data = pkt.into_payload_bytes();
                data.advance(HEADER_LEN);
                CodecItem::AudioFrame(AudioFrame {
                    ssrc,
                    timestamp,
                    pts,
                    frame_length: None,
                    discontinuity,
                    data,
                })
            }
            Kind::Video => {
                // MBZ (5 bits), T (1 bit), temporal reference (10 bits),
                // AN N S B E flags, picture type (3 bits), motion vectors.
                let header = [payload[0], payload[1], payload[2], payload[3]];
                let mut skip = HEADER_LEN;
                if (header[0] & 0b0000_0100) != 0 {
                    // MPEG-2 video-specific header extension.
                    skip += 4;
                    if payload.len() < skip {
                        return Err("MPEG-2 header extension is after end of packet".to_owned());
                    }
                }
                let is_picture_end = pkt.mark();
                let mut data = pkt.into_payload_bytes();
                data.advance(skip);
                CodecItem::VideoFrame(VideoFrame {
                    ssrc,
                    timestamp,
                    pts,
                    discontinuity,
                    picture_type: header[2] & 0b0000_0111,
                    is_random_access_point: (header[2] & 0b0010_0000) != 0,
                    is_picture_end,
                    data,
                })
            }
        });
        Ok(())
    }

    pub(super) fn pull(&mut self) -> Option<CodecItem> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::delivered;

    #[test]
    fn audio() {
        let mut d = Depacketizer::new(Kind::Audio);
        d.push(delivered(14, 90_000, 1, 0, false, b"\x00\x00\x00\x00\xff\xfbdata"))
            .unwrap();
        match d.pull() {
            Some(CodecItem::AudioFrame(f)) => {
                assert_eq!(&f.data[..], b"\xff\xfbdata");
                assert_eq!(f.frame_length, None);
            }
            o => panic!("unexpected {:?}", o),
        }
        assert!(d.pull().is_none());
    }

    #[test]
    fn too_short() {
        for kind in [Kind::Audio, Kind::Video] {
            let mut d = Depacketizer::new(kind);
            d.push(delivered(14, 90_000, 1, 0, false, b"\x00\x00\x00"))
                .unwrap_err();
            assert!(d.pull().is_none());
        }
    }

    #[test]
    fn video_i_picture() {
        let mut d = Depacketizer::new(Kind::Video);

        // S=1 (sequence header present), B=1, E=1, P=1 (I picture).
        d.push(delivered(
            32,
            90_000,
            1,
            3003,
            true,
            b"\x00\x00\x39\x00\x00\x00\x01\xb3",
        ))
        .unwrap();
        match d.pull() {
            Some(CodecItem::VideoFrame(f)) => {
                assert_eq!(f.picture_type, 1);
                assert!(f.is_random_access_point);
                assert!(f.is_picture_end);
                assert_eq!(&f.data()[..], b"\x00\x00\x01\xb3");
            }
            o => panic!("unexpected {:?}", o),
        }
    }

    #[test]
    fn video_mpeg2_extension() {
        let mut d = Depacketizer::new(Kind::Video);

        // T=1, P=2 (P picture), followed by a 4-byte extension.
        d.push(delivered(
            32,
            90_000,
            1,
            0,
            false,
            b"\x04\x00\x12\x00\xaa\xbb\xcc\xdd\x00\x00\x01\x00",
        ))
        .unwrap();
        match d.pull() {
            Some(CodecItem::VideoFrame(f)) => {
                assert_eq!(f.picture_type, 2);
                assert!(!f.is_random_access_point);
                assert!(!f.is_picture_end);
                assert_eq!(&f.into_data()[..], b"\x00\x00\x01\x00");
            }
            o => panic!("unexpected {:?}", o),
        }

        d.push(delivered(32, 90_000, 2, 0, false, b"\x04\x00\x12\x00\xaa"))
            .unwrap_err();
    }
}

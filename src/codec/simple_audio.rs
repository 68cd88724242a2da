// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audio codecs with one frame per packet, as defined in
//! [RFC 3551 section 4.5](https://datatracker.ietf.org/doc/html/rfc3551#section-4.5).

use std::num::NonZeroU32;

use super::{AudioFrame, CodecItem};
use crate::rtp::Packet;

/// How a payload's length maps to its duration.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Framing {
    /// Sample-based: each sample (across all channels) has this many bits.
    Samples { bits_per_sample: u32 },

    /// Frame-based with a constant frame size, such as GSM.
    Blocks {
        block_len: usize,
        samples_per_block: u32,
    },

    /// Frame-based with variable-size frames, such as QCELP.
    Variable,
}

#[derive(Debug)]
pub(crate) struct Depacketizer {
    framing: Framing,
    pending: Option<AudioFrame>,
}

impl Depacketizer {
    pub(super) fn new(framing: Framing) -> Self {
        Self {
            framing,
            pending: None,
        }
    }

    /// Returns the frame length in clock rate units, `Ok(None)` if the codec
    /// doesn't say, or an error if the length is impossible.
    fn frame_length(&self, payload_len: usize) -> Result<Option<NonZeroU32>, String> {
        match self.framing {
            Framing::Samples { bits_per_sample } => {
                let bits = u64::try_from(payload_len).map_err(|e| e.to_string())? * 8;
                let bits_per_sample = u64::from(bits_per_sample);
                if bits % bits_per_sample != 0 {
                    return Err(format!(
                        "invalid length {} for payload of {}-bit audio samples",
                        payload_len, bits_per_sample
                    ));
                }
                Ok(u32::try_from(bits / bits_per_sample)
                    .ok()
                    .and_then(NonZeroU32::new))
            }
            Framing::Blocks {
                block_len,
                samples_per_block,
            } => {
                if payload_len % block_len != 0 {
                    return Err(format!(
                        "invalid length {} for payload of {}-byte frames",
                        payload_len, block_len
                    ));
                }
                Ok(u32::try_from(payload_len / block_len)
                    .ok()
                    .and_then(|blocks| blocks.checked_mul(samples_per_block))
                    .and_then(NonZeroU32::new))
            }
            Framing::Variable => Ok(None),
        }
    }

    pub(super) fn push(&mut self, pkt: Packet) -> Result<(), String> {
        assert!(self.pending.is_none());
        if pkt.payload().is_empty() {
            return Err("empty payload".to_owned());
        }
        let frame_length = self.frame_length(pkt.payload().len())?;
        self.pending = Some(AudioFrame {
            ssrc: pkt.ssrc(),
            timestamp: pkt.timestamp(),
            pts: pkt.pts(),
            frame_length,
            discontinuity: pkt.is_discontinuity(),
            data: pkt.into_payload_bytes(),
        });
        Ok(())
    }

    pub(super) fn pull(&mut self) -> Option<CodecItem> {
        self.pending.take().map(CodecItem::AudioFrame)
    }
}

// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::payload::{Decoder, PayloadHandler};
use crate::rtp::{Packet, RawPacket, RawPacketBuilder};
use crate::Timestamp;

pub(crate) fn init_logging() {
    let h = mylog::Builder::new()
        .set_format(
            ::std::env::var("RTP_DEJITTER_FORMAT")
                .map_err(|_| ())
                .and_then(|s| mylog::Format::from_str(&s))
                .unwrap_or(mylog::Format::Google),
        )
        .set_spec(
            ::std::env::var("RTP_DEJITTER_LOG")
                .as_deref()
                .unwrap_or("info"),
        )
        .build();
    let _ = h.install();
}

/// A packet as seen by a [`Recorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Delivered {
    pub ssrc: u32,
    pub seq: u16,
    pub discontinuity: bool,
    pub pts: Duration,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub delivered: Vec<Delivered>,
    pub inits: usize,
    pub destroys: usize,
}

impl Recorded {
    pub(crate) fn seqs(&self) -> Vec<u16> {
        self.delivered.iter().map(|d| d.seq).collect()
    }
}

struct Recorder(Arc<Mutex<Recorded>>);

impl Decoder for Recorder {
    fn decode(&mut self, pkt: Packet) {
        let d = Delivered {
            ssrc: pkt.ssrc(),
            seq: pkt.sequence_number(),
            discontinuity: pkt.is_discontinuity(),
            pts: pkt.pts(),
            payload: pkt.into_payload_bytes(),
        };
        self.0.lock().unwrap().delivered.push(d);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.0.lock().unwrap().destroys += 1;
    }
}

/// Returns a handler whose decoders record everything into the returned log.
pub(crate) fn recorder() -> (Arc<dyn PayloadHandler>, Arc<Mutex<Recorded>>) {
    let log = Arc::new(Mutex::new(Recorded::default()));
    let handler_log = log.clone();
    let handler: Arc<dyn PayloadHandler> = Arc::new(move |_ssrc: u32| {
        handler_log.lock().unwrap().inits += 1;
        Box::new(Recorder(handler_log.clone())) as Box<dyn Decoder>
    });
    (handler, log)
}

/// Builds a simple RTP packet whose payload is its sequence number.
pub(crate) fn packet(ssrc: u32, seq: u16, timestamp: u32, payload_type: u8) -> Bytes {
    RawPacketBuilder {
        sequence_number: seq,
        timestamp,
        payload_type,
        ssrc,
        mark: false,
    }
    .build(seq.to_be_bytes())
    .unwrap()
}

/// Builds a [`Packet`] as a session would deliver it, for testing decoders
/// directly.
pub(crate) fn delivered(
    payload_type: u8,
    clock_rate: u32,
    seq: u16,
    timestamp: u32,
    mark: bool,
    payload: &[u8],
) -> Packet {
    let data = RawPacketBuilder {
        sequence_number: seq,
        timestamp,
        payload_type,
        ssrc: 0x1234_5678,
        mark,
    }
    .build(payload.iter().copied())
    .unwrap();
    let raw = RawPacket::new(data).unwrap();
    let payload_range = raw.payload_range().unwrap();
    let rate = NonZeroU32::new(clock_rate).unwrap();
    Packet {
        received: Instant::now(),
        timestamp: Timestamp::new(i64::from(timestamp), rate, timestamp).unwrap(),
        pts: Duration::from_micros(u64::from(timestamp) * 1_000_000 / u64::from(clock_rate)),
        discontinuity: false,
        raw,
        payload_range,
    }
}

/// Builds an RTP packet with the given marker bit and payload.
pub(crate) fn packet_with(
    ssrc: u32,
    seq: u16,
    timestamp: u32,
    payload_type: u8,
    mark: bool,
    payload: &[u8],
) -> Bytes {
    RawPacketBuilder {
        sequence_number: seq,
        timestamp,
        payload_type,
        ssrc,
        mark,
    }
    .build(payload.iter().copied())
    .unwrap()
}

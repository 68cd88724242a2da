#![no_main]
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::Instant;

use rtp_dejitter::codec::{CodecItem, Es, Format, Output};
use rtp_dejitter::rtp::RawPacketBuilder;
use rtp_dejitter::{autodetect, Session, SessionOptions};

struct Sink;

impl Output for Sink {
    fn add(&self, _ssrc: u32, _format: &Format) -> Option<Box<dyn Es>> {
        Some(Box::new(Sink))
    }
}

impl Es for Sink {
    fn send(&mut self, item: CodecItem) {
        let _ = item.pts();
    }
}

// The first byte picks a payload type; each following packet is a 1-byte
// length then that many bytes of payload.
fuzz_target!(|data: &[u8]| {
    let (&pt, mut data) = match data.split_first() {
        Some(r) => r,
        None => return,
    };
    let pt = match autodetect(pt & 0x7f, "ts", Arc::new(Sink)) {
        Ok(pt) => pt,
        Err(_) => return,
    };
    let number = pt.number();
    let mut session = Session::new(SessionOptions::default()).unwrap();
    session.add_payload_type(pt).unwrap();
    let now = Instant::now();
    let mut sequence_number = 0u16;
    while let Some((&len, rest)) = data.split_first() {
        let len = usize::from(len);
        if rest.len() < len {
            return;
        }
        let (payload, rest) = rest.split_at(len);
        data = rest;
        let pkt = RawPacketBuilder {
            sequence_number,
            timestamp: u32::from(sequence_number) * 160,
            payload_type: number,
            ssrc: 0,
            mark: (len & 1) != 0,
        }
        .build(payload.iter().copied())
        .unwrap();
        session.enqueue(pkt, now);
        session.dequeue(now);
        sequence_number = sequence_number.wrapping_add(1);
    }
});

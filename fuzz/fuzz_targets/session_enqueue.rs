#![no_main]
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtp_dejitter::{Decoder, Packet, PayloadType, Session, SessionOptions};

struct Discard;

impl Decoder for Discard {
    fn decode(&mut self, pkt: Packet) {
        assert!(pkt.payload().len() + 12 <= pkt.raw().len());
    }
}

// Each datagram is prefixed by a 3-byte header: the clock advance in
// milliseconds, then the big-endian length.
fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let mut session = Session::new(
        SessionOptions::default()
            .max_sources(2)
            .max_dropout(100)
            .max_misorder(20),
    )
    .unwrap();
    for pt in [0, 96] {
        session
            .add_payload_type(
                PayloadType::new(
                    pt,
                    if pt == 0 { 8_000 } else { 90_000 },
                    Arc::new(|_ssrc: u32| Box::new(Discard) as Box<dyn Decoder>),
                )
                .unwrap(),
            )
            .unwrap();
    }
    let mut now = Instant::now();
    loop {
        if data.len() < 3 {
            return;
        }
        let advance = Duration::from_millis(u64::from(data[0]));
        let len = usize::from(u16::from_be_bytes([data[1], data[2]]));
        if data.len() < 3 + len {
            return;
        }
        let pkt = bytes::Bytes::copy_from_slice(&data[3..3 + len]);
        data = &data[3 + len..];
        now += advance;
        session.enqueue(pkt, now);
        if let Some(deadline) = session.dequeue(now) {
            assert!(deadline >= now);
        }
    }
});

// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payload type autodetection for sessions without a session description.

use std::sync::Arc;

use log::debug;

use crate::codec::{Format, Handler, Output};
use crate::{Error, ErrorInt, PayloadType};

/// Returns a payload type registration for a packet's payload type number,
/// guessed from the static assignments of
/// [RFC 3551 section 6](https://datatracker.ietf.org/doc/html/rfc3551#section-6).
///
/// `demux_hint` names a chained demuxer. It's used for MPEG-2 transport
/// streams (payload type 33, defaulting to `ts`) and lets otherwise-unknown
/// payload types be treated as `h264` or `ts` byte streams. Pass an empty
/// string if there is no hint.
///
/// The returned payload type's decoders depacketize into `output`.
pub fn autodetect(
    payload_type: u8,
    demux_hint: &str,
    output: Arc<dyn Output>,
) -> Result<PayloadType, Error> {
    let format = match Format::for_static_payload_type(payload_type, demux_hint) {
        Some(f) => f,
        None => bail!(ErrorInt::UnsupportedPayloadType {
            payload_type,
            demux: demux_hint.to_owned(),
        }),
    };
    match &format {
        Format::Pcmu => debug!("detected G.711 mu-law"),
        Format::Gsm => debug!("detected GSM"),
        Format::Pcma => debug!("detected G.711 A-law"),
        Format::L16Stereo => debug!("detected stereo PCM"),
        Format::L16Mono => debug!("detected mono PCM"),
        Format::Qcelp => debug!("detected QCELP"),
        Format::Mpa => debug!("detected MPEG audio"),
        Format::Mpv => debug!("detected MPEG video"),
        Format::Demux { name } if payload_type == 33 => {
            debug!("detected MPEG-2 TS; chaining to demux={}", name)
        }
        Format::Demux { name } => debug!(
            "payload type {} unknown; using specified demux={}",
            payload_type, name
        ),
    }
    let clock_rate = format.clock_rate();
    PayloadType::new(
        payload_type,
        clock_rate,
        Arc::new(Handler::new(format, output)),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use test_case::test_case;

    use super::*;
    use crate::codec::tests::recording_output;
    use crate::codec::CodecItem;
    use crate::testutil::{init_logging, packet_with};
    use crate::{Session, SessionOptions};

    #[test_case(0, 8_000 ; "pcmu")]
    #[test_case(3, 8_000 ; "gsm")]
    #[test_case(8, 8_000 ; "pcma")]
    #[test_case(10, 44_100 ; "l16 stereo")]
    #[test_case(11, 44_100 ; "l16 mono")]
    #[test_case(12, 8_000 ; "qcelp")]
    #[test_case(14, 90_000 ; "mpeg audio")]
    #[test_case(32, 90_000 ; "mpeg video")]
    #[test_case(33, 90_000 ; "mpeg2 ts")]
    fn table(pt: u8, rate: u32) {
        init_logging();
        let (output, _) = recording_output();
        let t = autodetect(pt, "", output).unwrap();
        assert_eq!(t.number(), pt);
        assert_eq!(t.clock_rate().get(), rate);
    }

    #[test_case(96, "" ; "dynamic without hint")]
    #[test_case(2, "ps" ; "unassigned with unknown hint")]
    #[test_case(127, "es" ; "dynamic with unknown hint")]
    fn unsupported(pt: u8, hint: &str) {
        let (output, _) = recording_output();
        let e = autodetect(pt, hint, output).unwrap_err();
        assert!(
            matches!(*e.0, ErrorInt::UnsupportedPayloadType { payload_type, .. } if payload_type == pt),
            "{}",
            e
        );
    }

    #[test]
    fn dynamic_with_hint() {
        let (output, _) = recording_output();
        let t = autodetect(96, "h264", output.clone()).unwrap();
        assert_eq!(t.clock_rate().get(), 90_000);
        let t = autodetect(127, "ts", output).unwrap();
        assert_eq!(t.number(), 127);
    }

    #[test]
    fn transport_stream_end_to_end() {
        init_logging();
        let (output, log) = recording_output();
        let mut session = Session::new(SessionOptions::default()).unwrap();
        session
            .add_payload_type(autodetect(33, "", output).unwrap())
            .unwrap();
        let now = Instant::now();
        let ts_packet = [0x47; 188];
        session.enqueue(packet_with(0xabcd, 10, 9_000, 33, false, &ts_packet), now);
        session.dequeue(now);
        let l = log.lock().unwrap();
        assert_eq!(
            l.added,
            [(
                0xabcd,
                Format::Demux {
                    name: "ts".to_owned()
                }
            )]
        );
        match &l.items[..] {
            [CodecItem::StreamChunk(c)] => {
                assert_eq!(c.ssrc, 0xabcd);
                assert_eq!(c.data.len(), 188);
                assert_eq!(c.pts, std::time::Duration::from_millis(100));
            }
            o => panic!("unexpected {:?}", o),
        }
    }
}

// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! tokio-based [`Receiver`], which drives a [`Session`] from a packet stream.
//!
//! In theory there could be a similar async-std-based implementation.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::net::UdpSocket;
use tokio_util::codec::FramedRead;

use crate::codec::Output;
use crate::{Error, ErrorInt, Session};

/// The largest possible UDP payload.
const MAX_DATAGRAM_LEN: usize = 65_535;

/// A stream of received RTP packets, such as from [`udp_packets`] or
/// [`framed_packets`].
pub type PacketStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Returns a stream of the datagrams received on `socket`.
///
/// The socket should already be bound (and joined to any multicast group);
/// this only receives.
pub fn udp_packets(socket: UdpSocket) -> PacketStream {
    Box::pin(futures::stream::unfold(
        (socket, BytesMut::new()),
        |(socket, mut buf)| async move {
            buf.resize(MAX_DATAGRAM_LEN, 0);
            let item = match socket.recv(&mut buf[..]).await {
                Ok(len) => {
                    buf.truncate(len);
                    Ok(buf.split().freeze())
                }
                Err(e) => Err(e),
            };
            Some((item, (socket, buf)))
        },
    ))
}

/// Returns a stream of the RTP packets framed on `reader` as in
/// [RFC 4571](https://datatracker.ietf.org/doc/html/rfc4571), for example on a
/// connected `tokio::net::TcpStream`.
pub fn framed_packets<R: AsyncRead + Send + 'static>(reader: R) -> PacketStream {
    Box::pin(FramedRead::new(reader, FramedRtpCodec))
}

/// Decodes RTP packets from a stream in which each is prefixed with its
/// 16-bit big-endian length.
#[derive(Copy, Clone, Debug, Default)]
pub struct FramedRtpCodec;

impl tokio_util::codec::Decoder for FramedRtpCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = 2 + usize::from(u16::from_be_bytes([src[0], src[1]]));
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        let mut msg = src.split_to(len);
        msg.advance(2);
        Ok(Some(msg.freeze()))
    }
}

/// Options for a [`Receiver`].
#[derive(Default)]
pub struct ReceiverOptions {
    autodetect: Option<Autodetect>,
}

struct Autodetect {
    demux_hint: String,
    output: Arc<dyn Output>,
}

impl ReceiverOptions {
    /// Registers a payload type for the first received packet via
    /// [`crate::autodetect`], before that packet is enqueued.
    ///
    /// Packets are discarded until one has a detectable payload type.
    pub fn autodetect(self, demux_hint: impl Into<String>, output: Arc<dyn Output>) -> Self {
        Self {
            autodetect: Some(Autodetect {
                demux_hint: demux_hint.into(),
                output,
            }),
        }
    }
}

/// Drives a [`Session`]: enqueues each received packet and dequeues
/// whenever packets arrive or a source's deadline passes.
///
/// Both happen on the one task calling [`Receiver::run`], so the session
/// needs no lock.
pub struct Receiver<S> {
    session: Session,
    packets: S,
    autodetect: Option<Autodetect>,
}

impl<S> Receiver<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    pub fn new(session: Session, packets: S, options: ReceiverOptions) -> Self {
        Receiver {
            session,
            packets,
            autodetect: options.autodetect,
        }
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[inline]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Runs until the packet stream ends (returning `Ok`) or fails.
    ///
    /// Dropping the returned future stops reception; packets still queued
    /// stay in the session.
    pub async fn run(&mut self) -> Result<(), Error> {
        let wait = tokio::time::sleep_until(tokio::time::Instant::now());
        tokio::pin!(wait);
        let mut deadline: Option<Instant> = None;
        loop {
            if let Some(d) = deadline {
                wait.as_mut().reset(tokio::time::Instant::from_std(d));
            }
            tokio::select! {
                biased;
                pkt = self.packets.next() => match pkt {
                    None => {
                        info!("RTP flow stopped");
                        return Ok(());
                    }
                    Some(Err(e)) => bail!(ErrorInt::ReceiveError(e)),
                    Some(Ok(data)) => self.receive(data, now()),
                },
                _ = &mut wait, if deadline.is_some() => {},
            }
            deadline = self.session.dequeue(now());
        }
    }

    fn receive(&mut self, data: Bytes, received: Instant) {
        if data.len() < 2 {
            return;
        }
        let payload_type = data[1] & 0x7f;
        if (72..=76).contains(&payload_type) {
            // Muxed RTCP (RFC 5761 section 4); not handled.
            return;
        }
        if let Some(a) = self.autodetect.as_ref() {
            let pt = match crate::autodetect(payload_type, &a.demux_hint, a.output.clone()) {
                Ok(pt) => pt,
                Err(e) => {
                    debug!("discarding packet: {}", e);
                    return;
                }
            };
            if let Err(e) = self.session.add_payload_type(pt) {
                warn!("unable to register autodetected payload type: {}", e);
            }
            self.autodetect = None;
        }
        self.session.enqueue(data, received);
    }
}

/// Returns the current time according to tokio's clock, which tests may
/// pause and advance.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::codec::Decoder;

    use super::*;
    use crate::codec::tests::recording_output;
    use crate::codec::{CodecItem, Format};
    use crate::testutil::{init_logging, packet, packet_with, recorder};
    use crate::{PayloadType, SessionOptions};

    #[test]
    fn framing() {
        let mut codec = FramedRtpCodec;
        let mut buf = BytesMut::from(&b"\x00\x04as"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"df\x00\x00\x00\x01x\x00");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"asdf");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"x");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"\x00");
    }

    fn session() -> (Session, Arc<std::sync::Mutex<crate::testutil::Recorded>>) {
        init_logging();
        let (handler, log) = recorder();
        let mut session = Session::new(SessionOptions::default()).unwrap();
        session
            .add_payload_type(PayloadType::new(96, 90_000, handler).unwrap())
            .unwrap();
        (session, log)
    }

    // Time is paused so that arrivals are simultaneous. The timestamp gaps
    // then give enough jitter to wait for the reordered packet.
    #[tokio::test(start_paused = true)]
    async fn reorders_and_skips_rtcp() {
        let (session, log) = session();
        let mut rtcp = packet(1, 0, 0, 0).to_vec();
        rtcp[1] = 0xc8; // sender report
        let packets: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(packet(1, 100, 0, 96)),
            Ok(rtcp.into()),
            Ok(Bytes::from_static(b"\x80")),
            Ok(packet(1, 102, 3_600, 96)),
            Ok(packet(1, 101, 1_800, 96)),
        ];
        let packets = futures::stream::iter(packets);
        let mut receiver = Receiver::new(session, packets, ReceiverOptions::default());
        receiver.run().await.unwrap();
        assert_eq!(log.lock().unwrap().seqs(), [100, 101, 102]);
        assert_eq!(receiver.session().sources().count(), 1);
        let session = receiver.into_session();
        assert_eq!(session.sources().next().unwrap().next_seq, 103);
    }

    #[tokio::test]
    async fn receive_error() {
        let (session, _log) = session();
        let packets = futures::stream::iter(vec![
            Ok(packet(1, 100, 0, 96)),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        ]);
        let mut receiver = Receiver::new(session, packets, ReceiverOptions::default());
        let e = receiver.run().await.unwrap_err();
        assert!(matches!(*e.0, ErrorInt::ReceiveError(_)), "{}", e);
    }

    #[tokio::test]
    async fn autodetects_first_known_type() {
        init_logging();
        let (output, log) = recording_output();
        let session = Session::new(SessionOptions::default()).unwrap();
        let packets: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(packet_with(5, 1, 0, 96, false, &[0; 160])),
            Ok(packet_with(5, 2, 160, 8, false, &[0xd5; 160])),
            Ok(packet_with(5, 3, 320, 8, false, &[0xd5; 160])),
        ];
        let packets = futures::stream::iter(packets);
        let mut receiver = Receiver::new(
            session,
            packets,
            ReceiverOptions::default().autodetect("", output),
        );
        receiver.run().await.unwrap();
        let types = receiver.session().payload_types();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].number(), 8);
        let l = log.lock().unwrap();
        assert_eq!(l.added, [(5, Format::Pcma)]);
        assert_eq!(l.items.len(), 2);
        assert!(l
            .items
            .iter()
            .all(|i| matches!(i, CodecItem::AudioFrame(f) if !f.discontinuity)));
    }

    #[tokio::test(start_paused = true)]
    async fn framed_stream() {
        let (session, log) = session();
        let mut stream = Vec::new();
        for seq in [7u16, 9, 8] {
            let p = packet(1, seq, 1_800 * u32::from(seq - 7), 96);
            stream.extend_from_slice(&u16::try_from(p.len()).unwrap().to_be_bytes());
            stream.extend_from_slice(&p);
        }
        let packets = framed_packets(std::io::Cursor::new(stream));
        let mut receiver = Receiver::new(session, packets, ReceiverOptions::default());
        receiver.run().await.unwrap();
        assert_eq!(log.lock().unwrap().seqs(), [7, 8, 9]);
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let (session, log) = session();
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        let mut receiver = Receiver::new(session, rx, ReceiverOptions::default());
        let task = tokio::spawn(async move { receiver.run().await });

        tx.unbounded_send(Ok(packet(1, 0, 0, 96))).unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 20 ms of media arrived 30 ms later, then a packet is skipped; the
        // resulting jitter means waiting ~9.3 ms for it.
        tx.unbounded_send(Ok(packet(1, 1, 1_800, 96))).unwrap();
        tx.unbounded_send(Ok(packet(1, 3, 5_400, 96))).unwrap();
        settle().await;
        assert_eq!(log.lock().unwrap().seqs(), [0, 1]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        settle().await;
        assert_eq!(log.lock().unwrap().seqs(), [0, 1]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        settle().await;
        {
            let l = log.lock().unwrap();
            assert_eq!(l.seqs(), [0, 1, 3]);
            assert!(l.delivered[2].discontinuity);
        }

        drop(tx);
        task.await.unwrap().unwrap();
    }
}

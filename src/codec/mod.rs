// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in payload handlers for the static payload types of
//! [RFC 3551](https://datatracker.ietf.org/doc/html/rfc3551) and
//! [RFC 2250](https://datatracker.ietf.org/doc/html/rfc2250).
//!
//! Each handler depacketizes in-order RTP packets into [`CodecItem`]s and
//! sends them to an elementary stream ([`Es`]) that the caller's [`Output`]
//! creates once per source.

use std::num::{NonZeroU16, NonZeroU32};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use log::debug;
use pretty_hex::PrettyHex;

use crate::payload::{Decoder, PayloadHandler};
use crate::rtp::Packet;

pub(crate) mod mpeg;
pub(crate) mod simple_audio;
pub(crate) mod stream;

/// A media format which the built-in handlers can depacketize.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// G.711 µ-law, 8 kHz mono.
    Pcmu,

    /// GSM 06.10 full rate, 8 kHz mono.
    Gsm,

    /// G.711 A-law, 8 kHz mono.
    Pcma,

    /// 16-bit big-endian PCM, 44.1 kHz stereo.
    L16Stereo,

    /// 16-bit big-endian PCM, 44.1 kHz mono.
    L16Mono,

    /// QCELP, 8 kHz mono.
    Qcelp,

    /// MPEG-1/MPEG-2 audio elementary stream.
    Mpa,

    /// MPEG-1/MPEG-2 video elementary stream.
    Mpv,

    /// A byte stream to be handed to the named demuxer (eg `ts` for an
    /// MPEG-2 transport stream or `h264` for an Annex B stream).
    Demux { name: String },
}

impl Format {
    /// Looks up the format of a static payload type.
    ///
    /// Dynamic (and unassigned) payload types are only understood if
    /// `demux_hint` names a demuxer known to accept a raw byte stream.
    pub fn for_static_payload_type(payload_type: u8, demux_hint: &str) -> Option<Self> {
        // https://www.iana.org/assignments/rtp-parameters/rtp-parameters.xhtml#rtp-parameters-1
        Some(match payload_type {
            0 => Format::Pcmu,
            3 => Format::Gsm,
            8 => Format::Pcma,
            10 => Format::L16Stereo,
            11 => Format::L16Mono,
            12 => Format::Qcelp,
            14 => Format::Mpa,
            32 => Format::Mpv,
            33 => Format::Demux {
                name: match demux_hint {
                    "" => "ts".to_owned(),
                    h => h.to_owned(),
                },
            },
            _ if demux_hint == "h264" || demux_hint == "ts" => Format::Demux {
                name: demux_hint.to_owned(),
            },
            _ => return None,
        })
    }

    /// Returns the media type: `audio`, `video`, or `application`.
    pub fn media(&self) -> &'static str {
        match self {
            Format::Pcmu
            | Format::Gsm
            | Format::Pcma
            | Format::L16Stereo
            | Format::L16Mono
            | Format::Qcelp
            | Format::Mpa => "audio",
            Format::Mpv => "video",
            Format::Demux { .. } => "application",
        }
    }

    /// Returns the encoding name as registered with IANA, or the demuxer
    /// name.
    pub fn encoding_name(&self) -> &str {
        match self {
            Format::Pcmu => "PCMU",
            Format::Gsm => "GSM",
            Format::Pcma => "PCMA",
            Format::L16Stereo | Format::L16Mono => "L16",
            Format::Qcelp => "QCELP",
            Format::Mpa => "MPA",
            Format::Mpv => "MPV",
            Format::Demux { name } => name,
        }
    }

    /// Returns the RTP clock rate, in Hz.
    pub fn clock_rate(&self) -> u32 {
        match self {
            Format::Pcmu | Format::Gsm | Format::Pcma | Format::Qcelp => 8_000,
            Format::L16Stereo | Format::L16Mono => 44_100,
            Format::Mpa | Format::Mpv | Format::Demux { .. } => 90_000,
        }
    }

    /// Returns the number of audio channels, if fixed by the format.
    pub fn channels(&self) -> Option<NonZeroU16> {
        match self {
            Format::Pcmu | Format::Gsm | Format::Pcma | Format::L16Mono | Format::Qcelp => {
                NonZeroU16::new(1)
            }
            Format::L16Stereo | Format::Mpa => NonZeroU16::new(2),
            Format::Mpv | Format::Demux { .. } => None,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.media(), self.encoding_name(), self.clock_rate())?;
        if let Some(c) = self.channels() {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

/// Depacketized data sent to an [`Es`].
#[derive(Debug)]
pub enum CodecItem {
    AudioFrame(AudioFrame),
    VideoFrame(VideoFrame),
    StreamChunk(StreamChunk),
}

impl CodecItem {
    /// Returns the presentation time of the item's first byte.
    pub fn pts(&self) -> Duration {
        match self {
            CodecItem::AudioFrame(f) => f.pts,
            CodecItem::VideoFrame(f) => f.pts,
            CodecItem::StreamChunk(c) => c.pts,
        }
    }

    /// True if data was lost or skipped immediately before this item.
    pub fn is_discontinuity(&self) -> bool {
        match self {
            CodecItem::AudioFrame(f) => f.discontinuity,
            CodecItem::VideoFrame(f) => f.discontinuity,
            CodecItem::StreamChunk(c) => c.discontinuity,
        }
    }
}

/// An audio frame, which consists of one or more samples.
pub struct AudioFrame {
    pub ssrc: u32,
    pub timestamp: crate::Timestamp,
    pub pts: Duration,

    /// The length of this frame (in clock rate units), if the codec has a
    /// fixed number of samples per byte.
    pub frame_length: Option<NonZeroU32>,

    /// True if packets were lost or skipped immediately before this frame.
    pub discontinuity: bool,

    pub data: Bytes,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("ssrc", &format_args!("{:08x}", self.ssrc))
            .field("timestamp", &self.timestamp)
            .field("pts", &self.pts)
            .field("frame_length", &self.frame_length)
            .field("discontinuity", &self.discontinuity)
            .field("data", &self.data.hex_dump())
            .finish()
    }
}

impl Buf for AudioFrame {
    fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.data.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.data.advance(cnt)
    }
}

/// A fragment of an MPEG video elementary stream: one or more slices of a
/// single picture.
///
/// Use the [bytes::Buf] implementation to retrieve data.
pub struct VideoFrame {
    pub ssrc: u32,
    pub timestamp: crate::Timestamp,
    pub pts: Duration,

    /// True if packets were lost or skipped immediately before this fragment.
    pub discontinuity: bool,

    /// The picture coding type: 1 for I, 2 for P, 3 for B, 4 for D.
    pub picture_type: u8,

    /// True if the data begins with a sequence header, so decoding can start
    /// here.
    pub is_random_access_point: bool,

    /// True if this is the last fragment of the picture (the RTP marker bit).
    pub is_picture_end: bool,

    data: Bytes,
}

impl VideoFrame {
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("ssrc", &format_args!("{:08x}", self.ssrc))
            .field("timestamp", &self.timestamp)
            .field("pts", &self.pts)
            .field("discontinuity", &self.discontinuity)
            .field("picture_type", &self.picture_type)
            .field("is_random_access_point", &self.is_random_access_point)
            .field("is_picture_end", &self.is_picture_end)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl Buf for VideoFrame {
    fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.data.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.data.advance(cnt)
    }
}

/// A chunk of a byte stream destined for a chained demuxer.
pub struct StreamChunk {
    pub ssrc: u32,
    pub pts: Duration,
    pub discontinuity: bool,
    pub data: Bytes,
}

impl std::fmt::Debug for StreamChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChunk")
            .field("ssrc", &format_args!("{:08x}", self.ssrc))
            .field("pts", &self.pts)
            .field("discontinuity", &self.discontinuity)
            .field("data", &crate::hex::LimitedHex::new(&self.data, 64))
            .finish()
    }
}

/// Creates elementary streams, one per source and payload type.
pub trait Output: Send + Sync {
    /// Returns a new elementary stream for `ssrc`, or `None` if the output
    /// doesn't want this stream. In the latter case, its packets are
    /// discarded.
    fn add(&self, ssrc: u32, format: &Format) -> Option<Box<dyn Es>>;
}

/// An elementary stream: the destination of one source's depacketized
/// data for one payload type.
///
/// Dropped when the source is evicted or the session is dropped.
pub trait Es: Send {
    fn send(&mut self, item: CodecItem);
}

/// Turns RTP packets into [`CodecItem`]s.
/// This interface is unstable and for internal use; it's exposed for direct
/// fuzzing.
#[doc(hidden)]
#[derive(Debug)]
pub struct Depacketizer(DepacketizerInner);

#[derive(Debug)]
enum DepacketizerInner {
    SimpleAudio(simple_audio::Depacketizer),
    Mpeg(mpeg::Depacketizer),
    Stream(stream::Depacketizer),
}

impl Depacketizer {
    pub fn new(format: &Format) -> Self {
        Depacketizer(match format {
            Format::Pcmu | Format::Pcma => {
                DepacketizerInner::SimpleAudio(simple_audio::Depacketizer::new(
                    simple_audio::Framing::Samples { bits_per_sample: 8 },
                ))
            }
            Format::L16Mono => DepacketizerInner::SimpleAudio(simple_audio::Depacketizer::new(
                simple_audio::Framing::Samples {
                    bits_per_sample: 16,
                },
            )),
            Format::L16Stereo => {
                DepacketizerInner::SimpleAudio(simple_audio::Depacketizer::new(
                    simple_audio::Framing::Samples {
                        bits_per_sample: 32,
                    },
                ))
            }

            // RFC 3551 section 4.5.8: 33-byte frames of 160 samples each.
            Format::Gsm => DepacketizerInner::SimpleAudio(simple_audio::Depacketizer::new(
                simple_audio::Framing::Blocks {
                    block_len: 33,
                    samples_per_block: 160,
                },
            )),
            Format::Qcelp => DepacketizerInner::SimpleAudio(simple_audio::Depacketizer::new(
                simple_audio::Framing::Variable,
            )),
            Format::Mpa => DepacketizerInner::Mpeg(mpeg::Depacketizer::new(mpeg::Kind::Audio)),
            Format::Mpv => DepacketizerInner::Mpeg(mpeg::Depacketizer::new(mpeg::Kind::Video)),
            Format::Demux { .. } => DepacketizerInner::Stream(stream::Depacketizer::default()),
        })
    }

    pub fn push(&mut self, input: Packet) -> Result<(), String> {
        match &mut self.0 {
            DepacketizerInner::SimpleAudio(d) => d.push(input),
            DepacketizerInner::Mpeg(d) => d.push(input),
            DepacketizerInner::Stream(d) => d.push(input),
        }
    }

    pub fn pull(&mut self) -> Option<CodecItem> {
        match &mut self.0 {
            DepacketizerInner::SimpleAudio(d) => d.pull(),
            DepacketizerInner::Mpeg(d) => d.pull(),
            DepacketizerInner::Stream(d) => d.pull(),
        }
    }
}

/// A [`PayloadHandler`] which depacketizes a [`Format`] into an [`Output`].
pub struct Handler {
    format: Format,
    output: Arc<dyn Output>,
}

impl Handler {
    pub fn new(format: Format, output: Arc<dyn Output>) -> Self {
        Handler { format, output }
    }

    #[inline]
    pub fn format(&self) -> &Format {
        &self.format
    }
}

impl PayloadHandler for Handler {
    fn init(&self, ssrc: u32) -> Box<dyn Decoder> {
        let es = self.output.add(ssrc, &self.format);
        if es.is_none() {
            debug!("{:08x}: output declined {} stream", ssrc, &self.format);
        }
        Box::new(EsDecoder {
            depacketizer: Depacketizer::new(&self.format),
            es,
        })
    }
}

struct EsDecoder {
    depacketizer: Depacketizer,
    es: Option<Box<dyn Es>>,
}

impl Decoder for EsDecoder {
    fn decode(&mut self, pkt: Packet) {
        let es = match self.es.as_mut() {
            Some(es) => es,
            None => return,
        };
        let ssrc = pkt.ssrc();
        let seq = pkt.sequence_number();
        if let Err(description) = self.depacketizer.push(pkt) {
            debug!("{:08x}: dropping seq={}: {}", ssrc, seq, description);
            return;
        }
        while let Some(item) = self.depacketizer.pull() {
            es.send(item);
        }
    }
}

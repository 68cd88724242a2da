// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives an RTP stream, autodetecting its payload type, and logs what
//! each source sends.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Error};
use clap::Parser;
use log::{error, info};
use rtp_dejitter::codec::{CodecItem, Es, Format, Output};
use rtp_dejitter::tokio::{framed_packets, udp_packets, Receiver, ReceiverOptions};
use rtp_dejitter::{Session, SessionOptions};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Transport {
    /// Datagrams on a bound UDP socket.
    Udp,

    /// RFC 4571-framed packets on a connected TCP stream.
    Tcp,
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "udp" => Transport::Udp,
            "tcp" => Transport::Tcp,
            _ => bail!("unknown transport {:?}; expected udp or tcp", s),
        })
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        })
    }
}

#[derive(Parser)]
struct Opts {
    /// `udp` to bind to `addr`, or `tcp` to connect to it.
    #[arg(long, default_value_t = Transport::Udp)]
    transport: Transport,

    /// Address to bind (UDP) or connect to (TCP).
    #[arg(long, default_value = "0.0.0.0:5004")]
    addr: SocketAddr,

    /// Demuxer for MPEG-2 TS and otherwise unknown payload types, eg `ts` or `h264`.
    #[arg(long, default_value = "")]
    demux: String,

    /// Maximum number of active sources.
    #[arg(long, default_value_t = 1)]
    max_sources: usize,

    /// Seconds of silence before a source is dropped.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Maximum forward jump in sequence numbers before resynchronizing.
    #[arg(long, default_value_t = 3000)]
    max_dropout: u16,

    /// Maximum backward jump in sequence numbers before resynchronizing.
    #[arg(long, default_value_t = 100)]
    max_misorder: u16,
}

/// Logs every item it receives.
struct LoggingOutput;

struct LoggingEs {
    ssrc: u32,
    format: Format,
    items: u64,
    bytes: u64,
}

impl Output for LoggingOutput {
    fn add(&self, ssrc: u32, format: &Format) -> Option<Box<dyn Es>> {
        info!("{:08x}: new {} stream", ssrc, format);
        Some(Box::new(LoggingEs {
            ssrc,
            format: format.clone(),
            items: 0,
            bytes: 0,
        }))
    }
}

impl Es for LoggingEs {
    fn send(&mut self, item: CodecItem) {
        self.items += 1;
        let len = match &item {
            CodecItem::AudioFrame(f) => f.data.len(),
            CodecItem::VideoFrame(f) => f.data().len(),
            CodecItem::StreamChunk(c) => c.data.len(),
        };
        self.bytes += len as u64;
        log::debug!("{:08x}: {:#?}", self.ssrc, &item);
        if item.is_discontinuity() {
            info!("{:08x}: discontinuity at pts {:?}", self.ssrc, item.pts());
        }
    }
}

impl Drop for LoggingEs {
    fn drop(&mut self) {
        info!(
            "{:08x}: {} stream ended after {} items, {} bytes",
            self.ssrc, &self.format, self.items, self.bytes
        );
    }
}

fn init_logging() -> mylog::Handle {
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
    h.clone().install().unwrap();
    h
}

#[tokio::main]
async fn main() {
    let mut h = init_logging();
    if let Err(e) = {
        let _a = h.async_scope();
        main_inner().await
    } {
        error!("Fatal: {}", itertools::join(e.chain(), "\ncaused by: "));
        std::process::exit(1);
    }
    info!("Done");
}

async fn main_inner() -> Result<(), Error> {
    let opts = Opts::parse();
    let session = Session::new(
        SessionOptions::default()
            .max_sources(opts.max_sources)
            .source_timeout(Duration::from_secs(opts.timeout_secs))
            .max_dropout(opts.max_dropout)
            .max_misorder(opts.max_misorder),
    )?;
    let packets = match opts.transport {
        Transport::Udp => udp_packets(tokio::net::UdpSocket::bind(opts.addr).await?),
        Transport::Tcp => framed_packets(tokio::net::TcpStream::connect(opts.addr).await?),
    };
    info!("receiving RTP over {} at {}", opts.transport, opts.addr);
    let mut receiver = Receiver::new(
        session,
        packets,
        ReceiverOptions::default().autodetect(opts.demux, Arc::new(LoggingOutput)),
    );
    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);
    tokio::select! {
        r = receiver.run() => r?,
        _ = &mut stop => {},
    }
    for s in receiver.session().sources() {
        info!(
            "{:08x}: jitter {}, next seq {}, {} queued",
            s.ssrc, s.jitter, s.next_seq, s.queued
        );
    }
    Ok(())
}

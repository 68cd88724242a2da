// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP reception: per-source sequence tracking, jitter estimation, and
//! reordering.
//!
//! A [`Session`] accepts raw RTP datagrams via [`Session::enqueue`] and hands
//! them, in sequence order, to the [`Decoder`] registered for each packet's
//! payload type via [`Session::dequeue`]. Packets which arrive out of order
//! are held back for up to three times the source's interarrival jitter while
//! waiting for the missing ones.
//!
//! [`crate::tokio::Receiver`] drives a session from a UDP socket or RFC 4571-framed
//! TCP stream. [`autodetect`] registers built-in handlers for the static
//! payload types of RFC 3551.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

use std::fmt::{Debug, Display};
use std::num::NonZeroU32;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod autodetect;
pub mod codec;
mod error;
mod hex;
mod payload;
pub mod rtp;
mod session;
mod source;
mod timeline;
pub mod tokio;

#[cfg(test)]
mod testutil;

use error::ErrorInt;

pub use autodetect::autodetect;
pub use error::Error;
pub use payload::{Decoder, PayloadHandler, PayloadType};
pub use rtp::Packet;
pub use session::{Session, SessionOptions};
pub use source::SourceStats;

/// An annotated RTP timestamp.
///
/// This couples together three pieces of information:
///
/// *   The timestamp as an `i64`, with its top bits inferred from wraparounds
///     of the 32-bit RTP timestamp. Timestamps which differ by more than
///     `i32::MAX` from the previous one are treated as backward jumps.
/// *   The payload type's clock rate.
/// *   The first RTP timestamp seen for this source and payload type.
///
/// Together these allow conversion to seconds since the start of the stream.
/// The [`Display`] and [`Debug`] impls show the full timestamp, its bottom 32
/// bits (as seen on the wire), and that elapsed time.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Timestamp {
    /// The extended timestamp; `timestamp - start` is the elapsed time.
    timestamp: i64,

    /// The payload type's clock rate, in Hz.
    clock_rate: NonZeroU32,

    /// The first RTP timestamp seen for this source and payload type.
    start: u32,
}

impl Timestamp {
    /// Creates a new timestamp unless `timestamp - start` underflows.
    #[inline]
    pub fn new(timestamp: i64, clock_rate: NonZeroU32, start: u32) -> Option<Self> {
        timestamp.checked_sub(i64::from(start)).map(|_| Timestamp {
            timestamp,
            clock_rate,
            start,
        })
    }

    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the first RTP timestamp of the stream.
    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Returns the clock rate, in Hz.
    #[inline]
    pub fn clock_rate(&self) -> NonZeroU32 {
        self.clock_rate
    }

    /// Returns elapsed time since the stream start in clock rate units.
    #[inline]
    pub fn elapsed(&self) -> i64 {
        self.timestamp - i64::from(self.start)
    }

    /// Returns elapsed time since the stream start in seconds.
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        (self.elapsed() as f64) / (self.clock_rate.get() as f64)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (mod-2^32: {}), elapsed {:.03}s",
            self.timestamp,
            self.timestamp as u32,
            self.elapsed_secs()
        )
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

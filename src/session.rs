// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP session: the set of sources sharing one transport and payload type
//! table.

use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};

use crate::payload::{PayloadTable, PayloadType};
use crate::rtp::RawPacket;
use crate::source::{Source, SourceStats};
use crate::{Error, ErrorInt};

/// Options which must be decided before a [`Session`] is created.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    max_sources: usize,
    source_timeout: Duration,
    max_dropout: u16,
    max_misorder: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_sources: 1,
            source_timeout: Duration::from_secs(5),
            max_dropout: 3000,
            max_misorder: 100,
        }
    }
}

impl SessionOptions {
    /// Sets how many distinct sources may be active at once, from 1 to 255.
    ///
    /// Packets from further sources are dropped until an existing one times
    /// out.
    pub fn max_sources(self, max_sources: usize) -> Self {
        Self {
            max_sources,
            ..self
        }
    }

    /// Sets how long a source may go without sending any packet before it
    /// is expired.
    pub fn source_timeout(self, source_timeout: Duration) -> Self {
        Self {
            source_timeout,
            ..self
        }
    }

    /// Sets how far ahead (in sequence numbers) a packet may be from the
    /// expected one before it is treated as a discontinuity. At most 32767.
    pub fn max_dropout(self, max_dropout: u16) -> Self {
        Self {
            max_dropout,
            ..self
        }
    }

    /// Sets how far behind (in sequence numbers) a packet may be from the
    /// expected one before it is treated as a discontinuity. At most 32767.
    pub fn max_misorder(self, max_misorder: u16) -> Self {
        Self {
            max_misorder,
            ..self
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if !(1..=255).contains(&self.max_sources) {
            bail!(ErrorInt::InvalidArgument(format!(
                "max_sources={} must be in [1, 255]",
                self.max_sources
            )));
        }
        if self.source_timeout.is_zero() {
            bail!(ErrorInt::InvalidArgument(
                "source_timeout must be non-zero".to_owned()
            ));
        }
        for (name, value) in [
            ("max_dropout", self.max_dropout),
            ("max_misorder", self.max_misorder),
        ] {
            if value > i16::MAX as u16 {
                bail!(ErrorInt::InvalidArgument(format!(
                    "{}={} must be in [0, {}]",
                    name,
                    value,
                    i16::MAX
                )));
            }
        }
        Ok(())
    }
}

/// An RTP session receiving from any number of sources.
///
/// Packets go through two phases: [`Session::enqueue`] as each arrives, then
/// [`Session::dequeue`] to deliver those which are in order (or have waited
/// long enough) to the decoders of their payload types.
///
/// A session isn't internally synchronized. Either have one task call both
/// methods (as [`crate::tokio::Receiver`] does) or guard the whole session
/// with a single mutex; source eviction during `enqueue` destroys state that
/// `dequeue` walks.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    types: PayloadTable,
    sources: Vec<Source>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self, Error> {
        options.validate()?;
        Ok(Session {
            options,
            types: PayloadTable::default(),
            sources: Vec::new(),
        })
    }

    #[inline]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Adds a payload type.
    ///
    /// The set of payload types is fixed once the first source is admitted.
    /// Payload type numbers should be unique; if not, the first registered
    /// wins.
    pub fn add_payload_type(&mut self, pt: PayloadType) -> Result<(), Error> {
        if !self.sources.is_empty() {
            bail!(ErrorInt::FailedPrecondition(format!(
                "can't add payload type {} after RTP sources exist",
                pt.number()
            )));
        }
        debug!(
            "added payload type {} (clock rate {} Hz)",
            pt.number(),
            pt.clock_rate()
        );
        self.types.push(pt);
        Ok(())
    }

    pub fn payload_types(&self) -> &[PayloadType] {
        self.types.as_slice()
    }

    /// Returns a snapshot of each active source.
    pub fn sources(&self) -> impl Iterator<Item = SourceStats> + '_ {
        self.sources.iter().map(Source::stats)
    }

    /// Processes a packet received at `received`.
    ///
    /// Never fails: corrupt, duplicate, excess-source, and out-of-range
    /// packets are logged and dropped.
    pub fn enqueue(&mut self, data: Bytes, received: Instant) {
        let raw = match RawPacket::new(data) {
            Ok(r) => r,
            Err(e) => {
                debug!(
                    "dropping corrupt RTP packet: {}\n{:#?}",
                    e.reason,
                    crate::hex::LimitedHex::new(&e.data, 64)
                );
                return;
            }
        };
        let ssrc = raw.ssrc();
        let seq = raw.sequence_number();
        let rtp_timestamp = raw.timestamp();

        let timeout = self.options.source_timeout;
        self.sources.retain(|s| {
            if s.ssrc() == ssrc || !s.is_expired(received, timeout) {
                return true;
            }
            info!("RTP source {:08x} timed out", s.ssrc());
            false
        });

        let i = match self.sources.iter().position(|s| s.ssrc() == ssrc) {
            Some(i) => i,
            None => {
                if self.sources.len() >= self.options.max_sources {
                    warn!(
                        "too many RTP sources; dropping seq={} from {:08x}",
                        seq, ssrc
                    );
                    return;
                }
                self.sources
                    .push(Source::new(&self.types, ssrc, seq, received, rtp_timestamp));
                let i = self.sources.len() - 1;
                self.accept(i, raw, received);
                return;
            }
        };

        // Jitter is only meaningful relative to a known clock rate.
        let src = &mut self.sources[i];
        if let Some((_, pt)) = self.types.lookup(raw.payload_type()) {
            src.update_jitter(received, rtp_timestamp, pt.clock_rate());
        }
        src.record_arrival(received, rtp_timestamp);
        self.accept(i, raw, received);
    }

    /// Applies sequence policy and queues a packet for source `i`.
    fn accept(&mut self, i: usize, raw: RawPacket, received: Instant) {
        let src = &mut self.sources[i];
        if !src.check_sequence(
            raw.sequence_number(),
            self.options.max_dropout,
            self.options.max_misorder,
        ) {
            return;
        }
        src.insert(received, raw);
    }

    /// Delivers all packets which are ready at `now`.
    ///
    /// Returns the earliest time at which a source will stop waiting for a
    /// missing packet, if any source is waiting. The caller should call
    /// `dequeue` again at that time, or sooner if more packets arrive.
    pub fn dequeue(&mut self, now: Instant) -> Option<Instant> {
        let types = &self.types;
        self.sources
            .iter_mut()
            .filter_map(|s| s.dequeue(types, now))
            .min()
    }
}

// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-sender state: sequence tracking, jitter estimation, and the reorder
//! queue ("de-jitter buffer").

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::payload::{Decoder, PayloadTable};
use crate::rtp::{Packet, RawPacket};
use crate::timeline::Timeline;

/// Wall-clock ticks per second in jitter and deadline arithmetic.
const MICROS_PER_SEC: u64 = 1_000_000;

/// Deltas of this much or more (as `u16`) at delivery time mean the packet
/// is behind packets already delivered.
const LATE_THRESHOLD: u16 = 0x8000;

/// How long to wait for a missing packet, in multiples of the jitter
/// estimate.
const JITTER_WAIT_MULTIPLIER: u64 = 3;

/// Read-only snapshot of a source's state.
#[derive(Copy, Clone, Debug)]
pub struct SourceStats {
    pub ssrc: u32,

    /// Interarrival jitter estimate, in units of the clock rate of the
    /// payload types it has been sending.
    pub jitter: u32,

    /// When the most recent packet (of any payload type) arrived.
    pub last_received: Instant,

    /// The next sequence number expected on arrival.
    pub next_seq: u16,

    /// Packets waiting in the reorder queue.
    pub queued: usize,
}

struct QueuedPacket {
    received: Instant,
    raw: RawPacket,
}

/// Decoding state for one registered payload type.
struct Slot {
    decoder: Box<dyn Decoder>,
    timeline: Timeline,
}

pub(crate) struct Source {
    ssrc: u32,

    /// Interarrival jitter estimate, RFC 3550 style.
    jitter: u32,

    last_rx: Instant,
    last_rx_timestamp: u32,

    /// Tentative next expected sequence number for resynchronization.
    bad_seq: u16,

    /// Next expected sequence number on arrival.
    max_seq: u16,

    /// Sequence number of the last dequeued packet.
    last_seq: u16,

    /// Set on resynchronization; the next delivered packet is flagged.
    resynced: bool,

    /// Sorted by sequence number; no duplicates.
    queue: VecDeque<QueuedPacket>,

    /// Indexed as the session's [`PayloadTable`].
    slots: Vec<Slot>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("ssrc", &format_args!("{:08x}", self.ssrc))
            .field("jitter", &self.jitter)
            .field("max_seq", &self.max_seq)
            .field("bad_seq", &self.bad_seq)
            .field("last_seq", &self.last_seq)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Source {
    /// Creates a source for a packet with an unseen SSRC, initializing one
    /// decoder per payload type.
    pub(crate) fn new(
        table: &PayloadTable,
        ssrc: u32,
        init_seq: u16,
        received: Instant,
        rtp_timestamp: u32,
    ) -> Self {
        let slots = table
            .as_slice()
            .iter()
            .map(|pt| Slot {
                decoder: pt.init(ssrc),
                timeline: Timeline::new(pt.clock_rate()),
            })
            .collect();
        debug!("added RTP source {:08x}", ssrc);
        Source {
            ssrc,
            jitter: 0,
            last_rx: received,
            last_rx_timestamp: rtp_timestamp,
            bad_seq: init_seq,
            max_seq: init_seq,
            last_seq: init_seq.wrapping_sub(1),
            resynced: false,
            queue: VecDeque::new(),
            slots,
        }
    }

    #[inline]
    pub(crate) fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            ssrc: self.ssrc,
            jitter: self.jitter,
            last_received: self.last_rx,
            next_seq: self.max_seq,
            queued: self.queue.len(),
        }
    }

    /// Returns true if nothing has been received for longer than `timeout`.
    pub(crate) fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        matches!(self.last_rx.checked_add(timeout), Some(t) if t < now)
    }

    /// Updates the jitter estimate from a packet arriving at `received` with
    /// the given RTP timestamp, as in
    /// [RFC 3550 section 6.4.1](https://datatracker.ietf.org/doc/html/rfc3550#section-6.4.1).
    ///
    /// The estimate depends only on arrival times and RTP timestamps, not on
    /// sequence numbers.
    pub(crate) fn update_jitter(
        &mut self,
        received: Instant,
        rtp_timestamp: u32,
        clock_rate: NonZeroU32,
    ) {
        let elapsed = received.saturating_duration_since(self.last_rx);
        let elapsed_ticks = i64::try_from(
            elapsed.as_micros() * u128::from(clock_rate.get()) / u128::from(MICROS_PER_SEC),
        )
        .unwrap_or(i64::MAX);
        let ts_delta = i64::from((rtp_timestamp as i32).wrapping_sub(self.last_rx_timestamp as i32));
        let d = elapsed_ticks.saturating_sub(ts_delta).saturating_abs();
        let jitter = i64::from(self.jitter);
        let adjustment = d.saturating_sub(jitter).saturating_add(8) >> 4;
        self.jitter = (jitter + adjustment).clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Notes the arrival of a packet of any payload type.
    pub(crate) fn record_arrival(&mut self, received: Instant, rtp_timestamp: u32) {
        self.last_rx = received;
        self.last_rx_timestamp = rtp_timestamp;
    }

    /// Applies the dropout/misorder policy to an arriving sequence number.
    ///
    /// Returns false if the packet should be dropped. A jump beyond either
    /// threshold is only believed once the following sequence number also
    /// arrives; then the source resynchronizes, abandoning its queue.
    pub(crate) fn check_sequence(&mut self, seq: u16, max_dropout: u16, max_misorder: u16) -> bool {
        let delta = seq.wrapping_sub(self.max_seq) as i16;
        let out_of_range = if delta > 0 {
            delta.unsigned_abs() > max_dropout
        } else {
            delta.unsigned_abs() > max_misorder
        };
        if !out_of_range {
            if delta >= 0 {
                self.max_seq = seq.wrapping_add(1);
            }
            return true;
        }
        debug!(
            "{:08x}: sequence discontinuity (got {}, expected {})",
            self.ssrc, seq, self.max_seq
        );
        if seq != self.bad_seq {
            self.bad_seq = seq.wrapping_add(1);
            return false;
        }
        warn!(
            "{:08x}: sequence resynchronized at {}; discarding {} queued packets",
            self.ssrc,
            seq,
            self.queue.len()
        );
        self.max_seq = seq.wrapping_add(1);
        self.bad_seq = self.max_seq;
        self.last_seq = seq.wrapping_sub(1);
        self.resynced = true;
        self.queue.clear();
        true
    }

    /// Inserts a packet in sequence order. Returns false on a duplicate.
    pub(crate) fn insert(&mut self, received: Instant, raw: RawPacket) -> bool {
        let seq = raw.sequence_number();
        let mut pos = self.queue.len();
        for (i, queued) in self.queue.iter().enumerate() {
            let delta = seq.wrapping_sub(queued.raw.sequence_number()) as i16;
            if delta == 0 {
                debug!("{:08x}: duplicate packet seq={}", self.ssrc, seq);
                return false;
            }
            if delta < 0 {
                pos = i;
                break;
            }
        }
        self.queue.insert(pos, QueuedPacket { received, raw });
        true
    }

    /// Delivers every packet that is ready at `now`.
    ///
    /// Returns the time at which the head of the queue should be given up on
    /// if the source is still waiting for a missing packet.
    pub(crate) fn dequeue(&mut self, table: &PayloadTable, now: Instant) -> Option<Instant> {
        while let Some(queued) = self.queue.pop_front() {
            let seq = queued.raw.sequence_number();
            let gap = seq.wrapping_sub(self.last_seq.wrapping_add(1)) as i16;
            if gap > 0 {
                let clock_rate = table
                    .lookup(queued.raw.payload_type())
                    .map(|(_, pt)| pt.clock_rate());
                let deadline = self.deadline(clock_rate);
                if now < deadline {
                    self.queue.push_front(queued);
                    return Some(deadline);
                }
                trace!(
                    "{:08x}: gave up waiting for {} packet(s) before seq={}",
                    self.ssrc,
                    gap,
                    seq
                );
            }
            self.deliver(table, queued);
        }
        None
    }

    /// Returns when to stop waiting for packets missing before the head.
    fn deadline(&self, clock_rate: Option<NonZeroU32>) -> Instant {
        let wait = match clock_rate {
            Some(rate) => Duration::from_micros(
                JITTER_WAIT_MULTIPLIER * u64::from(self.jitter) * MICROS_PER_SEC
                    / u64::from(rate.get()),
            ),
            None => Duration::ZERO,
        };
        self.last_rx + wait
    }

    fn deliver(&mut self, table: &PayloadTable, queued: QueuedPacket) {
        let seq = queued.raw.sequence_number();
        let delta = seq.wrapping_sub(self.last_seq.wrapping_add(1));
        if delta >= LATE_THRESHOLD {
            info!(
                "{:08x}: ignoring late packet seq={} (already delivered {})",
                self.ssrc, seq, self.last_seq
            );
            return;
        }
        let discontinuity = delta != 0 || std::mem::take(&mut self.resynced);
        self.last_seq = seq;

        let payload_type = queued.raw.payload_type();
        let (i, pt) = match table.lookup(payload_type) {
            Some(e) => e,
            None => {
                debug!(
                    "{:08x}: dropping seq={} with unknown payload type {}",
                    self.ssrc, seq, payload_type
                );
                return;
            }
        };
        let payload_range = match queued.raw.payload_range() {
            Ok(r) => r,
            Err(reason) => {
                debug!(
                    "{:08x}: dropping seq={}: {}\n{:#?}",
                    self.ssrc,
                    seq,
                    reason,
                    crate::hex::LimitedHex::new(&queued.raw.0, 64)
                );
                return;
            }
        };
        let rtp_timestamp = queued.raw.timestamp();
        let slot = &mut self.slots[i];
        let timestamp = match slot.timeline.advance_to(rtp_timestamp) {
            Ok(ts) => ts,
            Err(description) => {
                debug!("{:08x}: dropping seq={}: {}", self.ssrc, seq, description);
                return;
            }
        };
        let pts = Duration::from_micros(
            u64::from(rtp_timestamp) * MICROS_PER_SEC / u64::from(pt.clock_rate().get()),
        );
        slot.decoder.decode(Packet {
            received: queued.received,
            timestamp,
            pts,
            discontinuity,
            raw: queued.raw,
            payload_range,
        });
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        debug!(
            "removing RTP source {:08x} with {} queued packets",
            self.ssrc,
            self.queue.len()
        );
    }
}

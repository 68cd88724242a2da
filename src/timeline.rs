// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::num::NonZeroU32;

use crate::Timestamp;

/// Creates [Timestamp]s (which don't wrap) from 32-bit (wrapping) RTP
/// timestamps.
///
/// The first timestamp placed on the timeline becomes its start. After that,
/// each timestamp is interpreted relative to the previous one: a difference
/// of more than `i32::MAX` is taken as a backward jump.
#[derive(Debug)]
pub(crate) struct Timeline {
    timestamp: i64,
    clock_rate: NonZeroU32,
    start: Option<u32>,
}

impl Timeline {
    pub(crate) fn new(clock_rate: NonZeroU32) -> Self {
        Timeline {
            timestamp: 0,
            clock_rate,
            start: None,
        }
    }

    /// Advances to the given (wrapping) RTP timestamp.
    pub(crate) fn advance_to(&mut self, rtp_timestamp: u32) -> Result<Timestamp, String> {
        let start = match self.start {
            None => {
                self.start = Some(rtp_timestamp);
                self.timestamp = i64::from(rtp_timestamp);
                rtp_timestamp
            }
            Some(start) => start,
        };
        let delta = (rtp_timestamp as i32).wrapping_sub(self.timestamp as i32);
        let timestamp = self
            .timestamp
            .checked_add(i64::from(delta))
            .ok_or_else(|| {
                format!(
                    "timestamp {} + delta {} won't fit in i64!",
                    self.timestamp, delta
                )
            })?;
        let timestamp = Timestamp::new(timestamp, self.clock_rate, start).ok_or_else(|| {
            format!(
                "timestamp {} + delta {} - start {} underflows i64!",
                self.timestamp, delta, start
            )
        })?;
        self.timestamp = timestamp.timestamp();
        Ok(timestamp)
    }
}

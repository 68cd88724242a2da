// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payload types: the session's static mapping from RTP payload type number
//! to a clock rate and a handler.

use std::fmt::Debug;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::rtp::Packet;
use crate::{Error, ErrorInt};

/// Creates [`Decoder`]s for one payload type.
///
/// A session calls [`PayloadHandler::init`] once per registered payload type
/// whenever it admits a new source. The returned decoder lives exactly as
/// long as that source; its `Drop` impl is the place to release whatever
/// `init` acquired.
pub trait PayloadHandler: Send + Sync {
    fn init(&self, ssrc: u32) -> Box<dyn Decoder>;
}

impl<F> PayloadHandler for F
where
    F: Fn(u32) -> Box<dyn Decoder> + Send + Sync,
{
    fn init(&self, ssrc: u32) -> Box<dyn Decoder> {
        self(ssrc)
    }
}

/// Per-source, per-payload-type consumer of in-order packets.
pub trait Decoder: Send {
    /// Consumes a packet. The session keeps nothing of it afterward.
    fn decode(&mut self, pkt: Packet);
}

/// A registrable payload type.
#[derive(Clone)]
pub struct PayloadType {
    number: u8,
    clock_rate: NonZeroU32,
    handler: Arc<dyn PayloadHandler>,
}

impl Debug for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadType")
            .field("number", &self.number)
            .field("clock_rate", &self.clock_rate)
            .finish()
    }
}

impl PayloadType {
    /// Creates a payload type, erroring on out-of-range numbers or a zero
    /// clock rate.
    pub fn new(
        number: u8,
        clock_rate: u32,
        handler: Arc<dyn PayloadHandler>,
    ) -> Result<Self, Error> {
        if number >= 0x80 {
            bail!(ErrorInt::InvalidArgument(format!(
                "payload type {} doesn't fit in 7 bits",
                number
            )));
        }
        let clock_rate = NonZeroU32::new(clock_rate).ok_or_else(|| {
            wrap!(ErrorInt::InvalidArgument(format!(
                "payload type {}: clock_rate=0 rejected to prevent division by zero",
                number
            )))
        })?;
        Ok(PayloadType {
            number,
            clock_rate,
            handler,
        })
    }

    #[inline]
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Returns the RTP clock rate, in Hz.
    #[inline]
    pub fn clock_rate(&self) -> NonZeroU32 {
        self.clock_rate
    }

    pub(crate) fn init(&self, ssrc: u32) -> Box<dyn Decoder> {
        self.handler.init(ssrc)
    }
}

/// The session's payload types, in registration order.
///
/// Sources keep one decoder per entry, indexed by position here.
#[derive(Debug, Default)]
pub(crate) struct PayloadTable(Vec<PayloadType>);

impl PayloadTable {
    pub(crate) fn push(&mut self, pt: PayloadType) {
        self.0.push(pt);
    }

    /// Returns the index and entry of the first payload type with the given
    /// number.
    pub(crate) fn lookup(&self, number: u8) -> Option<(usize, &PayloadType)> {
        self.0.iter().enumerate().find(|(_, pt)| pt.number == number)
    }

    pub(crate) fn as_slice(&self) -> &[PayloadType] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Discard;

    impl Decoder for Discard {
        fn decode(&mut self, _pkt: Packet) {}
    }

    fn handler() -> Arc<dyn PayloadHandler> {
        Arc::new(|_ssrc: u32| Box::new(Discard) as Box<dyn Decoder>)
    }

    #[test]
    fn zero_clock_rate() {
        let e = PayloadType::new(96, 0, handler()).unwrap_err();
        assert!(matches!(*e.0, ErrorInt::InvalidArgument(_)), "{}", e);
    }

    #[test]
    fn number_too_large() {
        let e = PayloadType::new(128, 90_000, handler()).unwrap_err();
        assert!(matches!(*e.0, ErrorInt::InvalidArgument(_)), "{}", e);
    }

    #[test]
    fn first_match_wins() {
        let mut table = PayloadTable::default();
        table.push(PayloadType::new(0, 8_000, handler()).unwrap());
        table.push(PayloadType::new(96, 90_000, handler()).unwrap());
        table.push(PayloadType::new(96, 48_000, handler()).unwrap());
        let (i, pt) = table.lookup(96).unwrap();
        assert_eq!(i, 1);
        assert_eq!(pt.clock_rate().get(), 90_000);
        assert!(table.lookup(97).is_none());
    }
}

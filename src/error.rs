// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// Errors are only returned for problems the caller can fix: bad
/// configuration or misuse of the session API. Problems with received
/// packets are never errors; such packets are dropped and logged.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The session is in a state where the call isn't allowed, eg adding a
    /// payload type after packets have been received.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Unsupported payload type {payload_type} (demux hint {demux:?})")]
    UnsupportedPayloadType { payload_type: u8, demux: String },

    #[error("Error receiving RTP packet: {0}")]
    ReceiveError(#[source] std::io::Error),
}

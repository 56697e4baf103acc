// Copyright [2026] [Paygate Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Paygate Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Error categories surfaced by the payment core.
///
/// The daemon's transport adapter maps each kind onto a gRPC status code;
/// the kinds themselves stay transport-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing request metadata.
    InvalidArgument,
    /// Bad signature, wrong sender, or income policy reject.
    Unauthenticated,
    /// Channel lock held, channel closed, or state changed under CAS.
    FailedPrecondition,
    /// Channel not on chain, stale nonce, or foreign replica group.
    IncorrectChannelId,
    /// KV or contract I/O failure.
    Unavailable,
    /// Serialization failure or invariant violation.
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Unauthenticated => "unauthenticated",
            Self::FailedPrecondition => "failed_precondition",
            Self::IncorrectChannelId => "incorrect_channel_id",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

/// A payment processing error: a kind plus a short human-readable message.
///
/// Pre-commit errors are surfaced to the client verbatim, so messages here
/// are load-bearing for client diagnostics (notably the `missing "<header>"`
/// form produced by the daemon's metadata parser).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PaymentError {
    kind: ErrorKind,
    message: String,
}

impl PaymentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn incorrect_channel_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IncorrectChannelId, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, PaymentError};

    #[test]
    fn message_is_preserved_verbatim() {
        let err = PaymentError::invalid_argument("missing \"snet-payment-channel-id\"");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "missing \"snet-payment-channel-id\"");
    }
}

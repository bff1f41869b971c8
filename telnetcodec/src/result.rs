//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


use thiserror::Error;

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised by the codec itself, as opposed to protocol violations by the peer, which
/// are reported in-band as [`crate::TelnetEvent::Warning`] and [`crate::TelnetEvent::Error`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The output compressor failed.
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    /// A subnegotiation payload could not be decoded.
    #[error("malformed {option} subnegotiation: {reason}")]
    Subnegotiation {
        /// The option being subnegotiated
        option: crate::TelnetOption,
        /// Specific reason for the failure
        reason: SubnegotiationErrorKind,
    },
}

/// Specific kinds of subnegotiation errors with structured context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubnegotiationErrorKind {
    /// Fewer bytes than the option's fixed payload size.
    #[error("expected {required} bytes, got {available}")]
    InsufficientData {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// More bytes than the option's fixed payload size.
    #[error("expected {expected} bytes, got {available}")]
    TrailingData {
        /// Number of bytes expected
        expected: usize,
        /// Number of bytes available
        available: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelnetOption;

    #[test]
    fn test_error_display() {
        let err = CodecError::Subnegotiation {
            option: TelnetOption::NAWS,
            reason: SubnegotiationErrorKind::InsufficientData {
                required: 4,
                available: 3,
            },
        };
        assert_eq!(
            err.to_string(),
            "malformed NAWS subnegotiation: expected 4 bytes, got 3"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: CodecError = std::io::Error::other("boom").into();
        assert!(matches!(err, CodecError::Compression(_)));
    }
}

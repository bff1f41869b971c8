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


//! Negotiate About Window Size ([RFC1073](http://www.iana.org/go/rfc1073))

use crate::{CodecError, CodecResult, SubnegotiationErrorKind, TelnetOption};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Terminal dimensions reported by the peer.
///
/// The payload is exactly four bytes: columns then rows, both big-endian `u16`.
///
/// ```
/// use pulsemud_telnetcodec::naws::WindowSize;
///
/// let size = WindowSize::decode(&[0x00, 0x50, 0x00, 0x18]).unwrap();
/// assert_eq!(size, WindowSize::new(80, 24));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    /// The number of columns (characters) in the terminal window
    pub cols: u16,
    /// The number of rows (lines) in the terminal window
    pub rows: u16,
}

impl WindowSize {
    /// Encoded payload length.
    pub const LEN: usize = 4;

    /// Creates a new `WindowSize`.
    pub fn new(cols: u16, rows: u16) -> Self {
        WindowSize { cols, rows }
    }

    /// Decodes a NAWS payload, rejecting anything that is not exactly four bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Subnegotiation`] for short or over-long payloads.
    pub fn decode(payload: &[u8]) -> CodecResult<WindowSize> {
        if payload.len() < Self::LEN {
            return Err(CodecError::Subnegotiation {
                option: TelnetOption::NAWS,
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: Self::LEN,
                    available: payload.len(),
                },
            });
        }
        if payload.len() > Self::LEN {
            return Err(CodecError::Subnegotiation {
                option: TelnetOption::NAWS,
                reason: SubnegotiationErrorKind::TrailingData {
                    expected: Self::LEN,
                    available: payload.len(),
                },
            });
        }
        Ok(WindowSize {
            cols: BigEndian::read_u16(&payload[0..2]),
            rows: BigEndian::read_u16(&payload[2..4]),
        })
    }

    /// Writes the four-byte payload.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        writer.write_u16::<BigEndian>(self.cols)?;
        writer.write_u16::<BigEndian>(self.rows)?;
        Ok(Self::LEN)
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.cols, self.rows)
    }
}

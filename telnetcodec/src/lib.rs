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


//! # PulseMUD Telnet Codec
//!
//! A byte-oriented Telnet (RFC 854) state machine for the server side of a MUD connection.
//! The codec owns no socket: the caller feeds it raw bytes and gets back [`TelnetEvent`]s,
//! then writes whatever the codec hands back for transmission.
//!
//! ## Core Components
//!
//! - [`TelnetCodec`] decodes inbound bytes, escapes outbound text, answers negotiation and
//!   switches the outbound stream to MCCP2 compression on request.
//! - [`TelnetOptions`] is the per-option RFC 1143 "Q method" table, keyed by option and
//!   [`TelnetSide`]. It never answers an acknowledgement with another acknowledgement, so
//!   negotiation cannot loop.
//! - [`TelnetFrame`] encodes negotiation and subnegotiation frames.
//! - [`naws::WindowSize`] decodes the NAWS (RFC 1073) payload.
//!
//! ## Default Policy
//!
//! The server agrees to perform ECHO, SUPPRESS-GO-AHEAD and COMPRESS2 itself and asks the
//! client for NAWS. Every other option is refused.
//!
//! ## Example
//!
//! ```
//! use pulsemud_telnetcodec::{TelnetCodec, TelnetEvent, TelnetOption, TelnetSide};
//!
//! let mut codec = TelnetCodec::new();
//! let request = codec.negotiate(TelnetSide::Remote, TelnetOption::NAWS, true).unwrap();
//! assert_eq!(request.as_deref(), Some(&[255u8, 253, 31][..]));
//!
//! let events = codec.feed(&[255, 251, 31, 255, 250, 31, 0, 80, 0, 24, 255, 240]);
//! assert_eq!(events[0], TelnetEvent::OptionGranted(TelnetOption::NAWS, TelnetSide::Remote));
//! assert!(matches!(events[1], TelnetEvent::Subnegotiation(TelnetOption::NAWS, _)));
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod codec;
pub mod consts;
mod event;
mod frame;
pub mod naws;
mod options;
mod result;

pub use self::codec::{MAX_SUBNEGOTIATION, TelnetCodec};
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::{QState, TelnetOption, TelnetOptions, TelnetSide};
pub use self::result::{CodecError, CodecResult, SubnegotiationErrorKind};

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


use crate::TelnetOption;
use crate::options::TelnetSide;
use bytes::Bytes;

///
/// `TelnetEvent` is what [`crate::TelnetCodec::feed`] produces for the connection layer.
///
/// Events are emitted in wire order. A `Send` always precedes the `OptionGranted` or
/// `OptionDenied` it belongs to.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Application bytes with all framing stripped
    Data(Bytes),
    /// Bytes that must be written to the peer, already escaped and compressed as needed
    Send(Bytes),
    /// An option came into effect on the given side
    OptionGranted(TelnetOption, TelnetSide),
    /// An option was refused, or withdrawn, on the given side
    OptionDenied(TelnetOption, TelnetSide),
    /// Payload of a completed `IAC SB ... IAC SE` sequence, unescaped
    Subnegotiation(TelnetOption, Bytes),
    /// A bare command such as NOP, AYT or GA
    Command(u8),
    /// A recoverable protocol violation
    Warning(String),
    /// An unrecoverable protocol violation; the connection must close
    Error(String),
}

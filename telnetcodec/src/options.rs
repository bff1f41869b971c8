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


use crate::{TelnetFrame, consts};
use std::fmt::Formatter;
use tracing::debug;

///
/// [Telnet Options](https://www.iana.org/assignments/telnet-options/telnet-options.xhtml)
/// understood by name. Anything else round-trips through [`TelnetOption::Unknown`].
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetOption {
    /// [`consts::option::BINARY`] Binary Transmission [RFC856](https://tools.ietf.org/html/rfc856)
    TransmitBinary,
    /// [`consts::option::ECHO`] Echo [RFC857](https://tools.ietf.org/html/rfc857)
    Echo,
    /// [`consts::option::SGA`] Suppress Go Ahead [RFC858](https://tools.ietf.org/html/rfc858)
    SuppressGoAhead,
    /// [`consts::option::STATUS`] Status [RFC859](http://www.iana.org/go/rfc859)
    Status,
    /// [`consts::option::TM`] Timing Mark [RFC860](http://www.iana.org/go/rfc860)
    TimingMark,
    /// [`consts::option::TTYPE`] Terminal Type [RFC1091](http://www.iana.org/go/rfc1091)
    TerminalType,
    /// [`consts::option::EOR`] End of Record [RFC885](http://www.iana.org/go/rfc885)
    EndOfRecord,
    /// [`consts::option::NAWS`] Negotiate About Window Size [RFC1073](http://www.iana.org/go/rfc1073)
    NAWS,
    /// [`consts::option::TSPEED`] Terminal Speed [RFC1079](http://www.iana.org/go/rfc1079)
    TerminalSpeed,
    /// [`consts::option::LINEMODE`] Linemode [RFC1184](http://www.iana.org/go/rfc1184)
    Linemode,
    /// [`consts::option::NEW_ENVIRONMENT`] New Environment [RFC1572](http://www.iana.org/go/rfc1572)
    NewEnvironment,
    /// [`consts::option::CHARSET`] Charset [RFC2066](http://www.iana.org/go/rfc2066)
    Charset,
    /// [`consts::option::MSDP`] Mud Server Data Protocol
    MSDP,
    /// [`consts::option::MSSP`] Mud Server Status Protocol
    MSSP,
    /// [`consts::option::COMPRESS2`] Mud Client Compression Protocol v2
    Compress2,
    /// [`consts::option::GMCP`] Generic Mud Communication Protocol
    GMCP,
    /// Any option without a named variant
    Unknown(u8),
}

impl TelnetOption {
    /// Wire code of this option.
    pub fn to_u8(&self) -> u8 {
        match self {
            TelnetOption::TransmitBinary => consts::option::BINARY,
            TelnetOption::Echo => consts::option::ECHO,
            TelnetOption::SuppressGoAhead => consts::option::SGA,
            TelnetOption::Status => consts::option::STATUS,
            TelnetOption::TimingMark => consts::option::TM,
            TelnetOption::TerminalType => consts::option::TTYPE,
            TelnetOption::EndOfRecord => consts::option::EOR,
            TelnetOption::NAWS => consts::option::NAWS,
            TelnetOption::TerminalSpeed => consts::option::TSPEED,
            TelnetOption::Linemode => consts::option::LINEMODE,
            TelnetOption::NewEnvironment => consts::option::NEW_ENVIRONMENT,
            TelnetOption::Charset => consts::option::CHARSET,
            TelnetOption::MSDP => consts::option::MSDP,
            TelnetOption::MSSP => consts::option::MSSP,
            TelnetOption::Compress2 => consts::option::COMPRESS2,
            TelnetOption::GMCP => consts::option::GMCP,
            TelnetOption::Unknown(byte) => *byte,
        }
    }

    /// Maps a wire code to an option, falling back to [`TelnetOption::Unknown`].
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            consts::option::BINARY => TelnetOption::TransmitBinary,
            consts::option::ECHO => TelnetOption::Echo,
            consts::option::SGA => TelnetOption::SuppressGoAhead,
            consts::option::STATUS => TelnetOption::Status,
            consts::option::TM => TelnetOption::TimingMark,
            consts::option::TTYPE => TelnetOption::TerminalType,
            consts::option::EOR => TelnetOption::EndOfRecord,
            consts::option::NAWS => TelnetOption::NAWS,
            consts::option::TSPEED => TelnetOption::TerminalSpeed,
            consts::option::LINEMODE => TelnetOption::Linemode,
            consts::option::NEW_ENVIRONMENT => TelnetOption::NewEnvironment,
            consts::option::CHARSET => TelnetOption::Charset,
            consts::option::MSDP => TelnetOption::MSDP,
            consts::option::MSSP => TelnetOption::MSSP,
            consts::option::COMPRESS2 => TelnetOption::Compress2,
            consts::option::GMCP => TelnetOption::GMCP,
            byte => TelnetOption::Unknown(byte),
        }
    }
}

impl std::fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetOption::Unknown(option) => write!(f, "Unknown({option})"),
            named => write!(f, "{named:?}"),
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        Self::from_u8(byte)
    }
}

impl From<TelnetOption> for u8 {
    fn from(option: TelnetOption) -> Self {
        option.to_u8()
    }
}

/// Which party performs an option.
///
/// Every option runs two independent Q-method state machines:
///
/// ```text
/// Local:  WILL <option>  →  peer answers DO / DONT
/// Remote: DO <option>    →  peer answers WILL / WONT
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetSide {
    /// We perform the option
    Local,
    /// The peer performs the option
    Remote,
}

impl TelnetSide {
    /// The frame that asks for, or agrees to, enabling `option` on this side.
    fn agree(self, option: TelnetOption) -> TelnetFrame {
        match self {
            TelnetSide::Local => TelnetFrame::Will(option),
            TelnetSide::Remote => TelnetFrame::Do(option),
        }
    }

    /// The frame that refuses, or disables, `option` on this side.
    fn refuse(self, option: TelnetOption) -> TelnetFrame {
        match self {
            TelnetSide::Local => TelnetFrame::Wont(option),
            TelnetSide::Remote => TelnetFrame::Dont(option),
        }
    }
}

impl std::fmt::Display for TelnetSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetSide::Local => write!(f, "Local"),
            TelnetSide::Remote => write!(f, "Remote"),
        }
    }
}

/// [RFC1143](https://tools.ietf.org/html/rfc1143) negotiation state for one side of one option.
///
/// The `*Opposite` variants are the RFC's non-empty queue bit: a negotiation is in flight and
/// the opposite request is queued behind it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum QState {
    /// Disabled
    #[default]
    No,
    /// Enabled, disable requested
    WantNo,
    /// Enabled, disable requested, re-enable queued
    WantNoOpposite,
    /// Enabled
    Yes,
    /// Disabled, enable requested
    WantYes,
    /// Disabled, enable requested, disable queued
    WantYesOpposite,
}

impl QState {
    /// Whether the option is in effect on the wire right now.
    pub fn is_enabled(self) -> bool {
        matches!(self, QState::Yes | QState::WantNo | QState::WantNoOpposite)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct OptionState {
    local: QState,
    remote: QState,
}

impl OptionState {
    fn side(&mut self, side: TelnetSide) -> &mut QState {
        match side {
            TelnetSide::Local => &mut self.local,
            TelnetSide::Remote => &mut self.remote,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SupportState {
    local: bool,
    remote: bool,
}

/// Negotiation state and support policy for all 256 option codes.
///
/// Support policy decides how unsolicited requests are answered. An offer for an
/// unsupported option is always refused, and we never request one ourselves.
#[derive(Clone, Debug)]
pub struct TelnetOptions {
    support: [SupportState; 256],
    state: [OptionState; 256],
}

impl TelnetOptions {
    /// An option table that supports nothing on either side.
    pub fn empty() -> TelnetOptions {
        TelnetOptions {
            support: [SupportState::default(); 256],
            state: [OptionState::default(); 256],
        }
    }

    /// Marks `option` as supported, or not, on `side`.
    pub fn set_supported(&mut self, option: TelnetOption, side: TelnetSide, supported: bool) {
        let entry = &mut self.support[usize::from(option.to_u8())];
        match side {
            TelnetSide::Local => entry.local = supported,
            TelnetSide::Remote => entry.remote = supported,
        }
    }

    /// Whether `option` is supported on `side`.
    pub fn is_supported(&self, option: TelnetOption, side: TelnetSide) -> bool {
        let entry = self.support[usize::from(option.to_u8())];
        match side {
            TelnetSide::Local => entry.local,
            TelnetSide::Remote => entry.remote,
        }
    }

    /// Current Q-method state of `option` on `side`.
    pub fn qstate(&self, option: TelnetOption, side: TelnetSide) -> QState {
        let entry = self.state[usize::from(option.to_u8())];
        match side {
            TelnetSide::Local => entry.local,
            TelnetSide::Remote => entry.remote,
        }
    }

    /// Whether `option` is currently in effect on `side`.
    pub fn is_enabled(&self, option: TelnetOption, side: TelnetSide) -> bool {
        self.qstate(option, side).is_enabled()
    }

    fn slot(&mut self, option: TelnetOption, side: TelnetSide) -> &mut QState {
        self.state[usize::from(option.to_u8())].side(side)
    }

    /// Ask for `option` to be enabled on `side`.
    ///
    /// Returns the frame to transmit, or `None` when the option is unsupported, already
    /// enabled, or the request was folded into a negotiation already in flight.
    pub fn request_enable(&mut self, option: TelnetOption, side: TelnetSide) -> Option<TelnetFrame> {
        if !self.is_supported(option, side) {
            return None;
        }
        let slot = self.slot(option, side);
        match *slot {
            QState::No => {
                *slot = QState::WantYes;
                Some(side.agree(option))
            }
            QState::WantNo => {
                *slot = QState::WantNoOpposite;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantYes;
                None
            }
            QState::Yes | QState::WantYes | QState::WantNoOpposite => None,
        }
    }

    /// Ask for `option` to be disabled on `side`.
    pub fn request_disable(
        &mut self,
        option: TelnetOption,
        side: TelnetSide,
    ) -> Option<TelnetFrame> {
        let slot = self.slot(option, side);
        match *slot {
            QState::Yes => {
                *slot = QState::WantNo;
                Some(side.refuse(option))
            }
            QState::WantYes => {
                *slot = QState::WantYesOpposite;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::WantNo;
                None
            }
            QState::No | QState::WantNo | QState::WantYesOpposite => None,
        }
    }

    /// Process a WILL (for [`TelnetSide::Remote`]) or DO (for [`TelnetSide::Local`]).
    pub fn receive_enable(&mut self, option: TelnetOption, side: TelnetSide) -> Option<TelnetFrame> {
        let supported = self.is_supported(option, side);
        let slot = self.slot(option, side);
        match *slot {
            QState::No if supported => {
                *slot = QState::Yes;
                Some(side.agree(option))
            }
            QState::No => Some(side.refuse(option)),
            QState::Yes => None,
            QState::WantNo => {
                debug!("{option} {side}: disable answered by enable");
                *slot = QState::No;
                None
            }
            QState::WantNoOpposite => {
                debug!("{option} {side}: disable answered by enable");
                *slot = QState::Yes;
                None
            }
            QState::WantYes => {
                *slot = QState::Yes;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantNo;
                Some(side.refuse(option))
            }
        }
    }

    /// Process a WONT (for [`TelnetSide::Remote`]) or DONT (for [`TelnetSide::Local`]).
    pub fn receive_disable(&mut self, option: TelnetOption, side: TelnetSide) -> Option<TelnetFrame> {
        let slot = self.slot(option, side);
        match *slot {
            QState::No => None,
            QState::Yes => {
                *slot = QState::No;
                Some(side.refuse(option))
            }
            QState::WantNoOpposite => {
                *slot = QState::WantYes;
                Some(side.agree(option))
            }
            QState::WantNo | QState::WantYes | QState::WantYesOpposite => {
                *slot = QState::No;
                None
            }
        }
    }
}

impl Default for TelnetOptions {
    /// The server policy: we offer ECHO, SGA and COMPRESS2 and ask for NAWS.
    fn default() -> Self {
        let mut options = TelnetOptions::empty();
        options.set_supported(TelnetOption::Echo, TelnetSide::Local, true);
        options.set_supported(TelnetOption::SuppressGoAhead, TelnetSide::Local, true);
        options.set_supported(TelnetOption::Compress2, TelnetSide::Local, true);
        options.set_supported(TelnetOption::NAWS, TelnetSide::Remote, true);
        options
    }
}

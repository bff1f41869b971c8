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


use crate::{TelnetOption, consts};
use bytes::{BufMut, BytesMut};

/// An outbound Telnet control frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TelnetFrame {
    /// `IAC DO <option>`
    Do(TelnetOption),
    /// `IAC DONT <option>`
    Dont(TelnetOption),
    /// `IAC WILL <option>`
    Will(TelnetOption),
    /// `IAC WONT <option>`
    Wont(TelnetOption),
    /// `IAC SB <option> <payload> IAC SE`, with IAC bytes in the payload doubled
    Subnegotiate(TelnetOption, Vec<u8>),
    /// `IAC GA`
    GoAhead,
}

impl TelnetFrame {
    /// Appends the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            TelnetFrame::Do(option) => put_negotiation(dst, consts::DO, *option),
            TelnetFrame::Dont(option) => put_negotiation(dst, consts::DONT, *option),
            TelnetFrame::Will(option) => put_negotiation(dst, consts::WILL, *option),
            TelnetFrame::Wont(option) => put_negotiation(dst, consts::WONT, *option),
            TelnetFrame::Subnegotiate(option, payload) => {
                dst.reserve(payload.len() + 5);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SB);
                dst.put_u8(option.to_u8());
                put_escaped(dst, payload);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SE);
            }
            TelnetFrame::GoAhead => {
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::GA);
            }
        }
    }

    /// The wire form of this frame as a standalone buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(3);
        self.encode(&mut dst);
        dst
    }
}

fn put_negotiation(dst: &mut BytesMut, command: u8, option: TelnetOption) {
    dst.reserve(3);
    dst.put_u8(consts::IAC);
    dst.put_u8(command);
    dst.put_u8(option.to_u8());
}

/// Appends `data` to `dst`, doubling every literal IAC byte.
pub(crate) fn put_escaped(dst: &mut BytesMut, data: &[u8]) {
    dst.reserve(data.len());
    for chunk in data.split_inclusive(|&byte| byte == consts::IAC) {
        dst.put_slice(chunk);
        if chunk.last() == Some(&consts::IAC) {
            dst.put_u8(consts::IAC);
        }
    }
}

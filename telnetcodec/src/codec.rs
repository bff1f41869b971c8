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


use crate::frame::put_escaped;
use crate::options::{QState, TelnetOptions, TelnetSide};
use crate::{CodecResult, TelnetEvent, TelnetFrame, TelnetOption, consts};
use bytes::{BufMut, Bytes, BytesMut};
use pulsemud_compress::Compressor;
use tracing::{debug, trace};

/// Largest subnegotiation payload accepted before the peer is considered hostile.
pub const MAX_SUBNEGOTIATION: usize = 1024;

/// A per-connection Telnet state machine.
///
/// `TelnetCodec` owns no socket. Inbound bytes go through [`TelnetCodec::feed`], which
/// returns [`TelnetEvent`]s in wire order; outbound text goes through
/// [`TelnetCodec::send`]. Negotiation replies are produced as [`TelnetEvent::Send`] so the
/// caller writes everything through one buffer.
///
/// Once the peer grants `COMPRESS2` (or [`TelnetCodec::begin_compress`] is called), every
/// byte returned from this codec after the start sequence is part of the MCCP2 zlib stream.
/// The start sequence is emitted as a [`TelnetEvent::Send`] in the same `feed` call, ahead of
/// any reply that follows it.
///
/// ```
/// use pulsemud_telnetcodec::{TelnetCodec, TelnetEvent};
///
/// let mut codec = TelnetCodec::new();
/// let events = codec.feed(b"look\r\n");
/// assert!(matches!(&events[..], [TelnetEvent::Data(data)] if &data[..] == b"look\r\n"));
/// ```
pub struct TelnetCodec {
    decoder_state: DecoderState,
    subnegotiation: BytesMut,
    after_cr: bool,
    options: TelnetOptions,
    compressor: Option<Compressor>,
}

impl TelnetCodec {
    /// Creates a codec with the default server option policy.
    pub fn new() -> TelnetCodec {
        TelnetCodec::default()
    }

    /// Creates a codec with a custom option policy.
    pub fn with_options(options: TelnetOptions) -> TelnetCodec {
        TelnetCodec {
            decoder_state: DecoderState::NormalData,
            subnegotiation: BytesMut::new(),
            after_cr: false,
            options,
            compressor: None,
        }
    }

    /// The negotiation table.
    pub fn options(&self) -> &TelnetOptions {
        &self.options
    }

    /// Whether `option` is currently in effect on `side`.
    pub fn is_enabled(&self, option: TelnetOption, side: TelnetSide) -> bool {
        self.options.is_enabled(option, side)
    }

    /// Whether outbound bytes are being compressed.
    pub fn is_compressing(&self) -> bool {
        self.compressor.is_some()
    }

    /// The active compressor, for statistics.
    pub fn compressor(&self) -> Option<&Compressor> {
        self.compressor.as_ref()
    }

    /// Decodes `input` and returns the resulting events.
    ///
    /// Consecutive data bytes are coalesced into one [`TelnetEvent::Data`]. Sequences split
    /// across calls are resumed on the next call. Decoding stops at the first
    /// [`TelnetEvent::Error`]; the remaining input is discarded.
    pub fn feed(&mut self, input: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        let mut data = BytesMut::new();
        for &byte in input {
            match (self.decoder_state, byte) {
                (DecoderState::NormalData, consts::IAC) => {
                    self.after_cr = false;
                    self.decoder_state = DecoderState::InterpretAsCommand;
                }
                (DecoderState::NormalData, consts::NUL)
                    if self.after_cr
                        && !self
                            .options
                            .is_enabled(TelnetOption::TransmitBinary, TelnetSide::Remote) =>
                {
                    // NVT bare carriage return padding
                    self.after_cr = false;
                }
                (DecoderState::NormalData, _) => {
                    self.after_cr = byte == consts::CR;
                    data.put_u8(byte);
                }
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    self.decoder_state = DecoderState::NormalData;
                    data.put_u8(consts::IAC);
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    events.push(TelnetEvent::Warning(
                        "subnegotiation end outside of a subnegotiation".into(),
                    ));
                }
                (
                    DecoderState::InterpretAsCommand,
                    consts::NOP
                    | consts::DM
                    | consts::BRK
                    | consts::IP
                    | consts::AO
                    | consts::AYT
                    | consts::EC
                    | consts::EL
                    | consts::GA
                    | consts::EOR,
                ) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    events.push(TelnetEvent::Command(byte));
                }
                (DecoderState::InterpretAsCommand, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    events.push(TelnetEvent::Warning(format!(
                        "unknown command {byte:#04X}"
                    )));
                }
                (DecoderState::NegotiateDo, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    self.negotiated(byte.into(), TelnetSide::Local, true, &mut events);
                }
                (DecoderState::NegotiateDont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    self.negotiated(byte.into(), TelnetSide::Local, false, &mut events);
                }
                (DecoderState::NegotiateWill, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    self.negotiated(byte.into(), TelnetSide::Remote, true, &mut events);
                }
                (DecoderState::NegotiateWont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    self.negotiated(byte.into(), TelnetSide::Remote, false, &mut events);
                }
                (DecoderState::Subnegotiate, _) => {
                    self.subnegotiation.clear();
                    self.decoder_state = DecoderState::SubnegotiateArgument(byte.into());
                }
                (DecoderState::SubnegotiateArgument(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                }
                (DecoderState::SubnegotiateArgument(option), _)
                | (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    if self.subnegotiation.len() >= MAX_SUBNEGOTIATION {
                        self.decoder_state = DecoderState::NormalData;
                        self.subnegotiation.clear();
                        flush_data(&mut data, &mut events);
                        events.push(TelnetEvent::Error(format!(
                            "{option} subnegotiation exceeds {MAX_SUBNEGOTIATION} bytes"
                        )));
                        return events;
                    }
                    self.subnegotiation.put_u8(byte);
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    flush_data(&mut data, &mut events);
                    let payload = self.subnegotiation.split().freeze();
                    trace!("{option} subnegotiation of {} bytes", payload.len());
                    events.push(TelnetEvent::Subnegotiation(option, payload));
                }
                (DecoderState::SubnegotiateArgumentIAC(option), _) => {
                    self.decoder_state = DecoderState::NormalData;
                    self.subnegotiation.clear();
                    flush_data(&mut data, &mut events);
                    events.push(TelnetEvent::Warning(format!(
                        "command {byte:#04X} inside {option} subnegotiation"
                    )));
                }
            }
        }
        flush_data(&mut data, &mut events);
        events
    }

    /// Escapes `data` for transmission.
    ///
    /// # Errors
    ///
    /// Fails only when compression is active and the compressor fails.
    pub fn send(&mut self, data: &[u8]) -> CodecResult<Bytes> {
        let mut raw = BytesMut::with_capacity(data.len());
        put_escaped(&mut raw, data);
        self.outbound(raw)
    }

    /// Requests that `option` be enabled or disabled on `side`.
    ///
    /// Returns `None` when no frame needs to go out.
    pub fn negotiate(
        &mut self,
        side: TelnetSide,
        option: TelnetOption,
        enable: bool,
    ) -> CodecResult<Option<Bytes>> {
        let frame = if enable {
            self.options.request_enable(option, side)
        } else {
            self.options.request_disable(option, side)
        };
        match frame {
            Some(frame) => {
                debug!("negotiating {frame:?}");
                self.outbound(frame.to_bytes()).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Offers (`WILL ECHO`) or withdraws (`WONT ECHO`) server-side echo, which makes the
    /// client suppress its own local echo.
    pub fn will_echo(&mut self, enable: bool) -> CodecResult<Option<Bytes>> {
        self.negotiate(TelnetSide::Local, TelnetOption::Echo, enable)
    }

    /// `IAC GA`
    pub fn go_ahead(&mut self) -> CodecResult<Bytes> {
        self.outbound(TelnetFrame::GoAhead.to_bytes())
    }

    /// Emits the MCCP2 start sequence and compresses everything after it.
    ///
    /// Returns an empty buffer if compression is already running.
    pub fn begin_compress(&mut self) -> CodecResult<Bytes> {
        if self.compressor.is_some() {
            return Ok(Bytes::new());
        }
        let start = TelnetFrame::Subnegotiate(TelnetOption::Compress2, Vec::new()).to_bytes();
        self.compressor = Some(Compressor::new());
        debug!("MCCP2 compression started");
        Ok(start.freeze())
    }

    fn outbound(&mut self, raw: BytesMut) -> CodecResult<Bytes> {
        match self.compressor.as_mut() {
            Some(compressor) => Ok(compressor.compress(&raw)?),
            None => Ok(raw.freeze()),
        }
    }

    fn negotiated(
        &mut self,
        option: TelnetOption,
        side: TelnetSide,
        enable: bool,
        events: &mut Vec<TelnetEvent>,
    ) {
        let before = self.options.qstate(option, side);
        let reply = if enable {
            self.options.receive_enable(option, side)
        } else {
            self.options.receive_disable(option, side)
        };
        let after = self.options.qstate(option, side);
        trace!("{option} {side}: {before:?} -> {after:?}");

        if let Some(frame) = reply {
            match self.outbound(frame.to_bytes()) {
                Ok(bytes) => events.push(TelnetEvent::Send(bytes)),
                Err(err) => {
                    events.push(TelnetEvent::Error(err.to_string()));
                    return;
                }
            }
        }
        if !before.is_enabled() && after.is_enabled() {
            if option == TelnetOption::Compress2 && side == TelnetSide::Local {
                // Replies later in this feed must already be compressed.
                match self.begin_compress() {
                    Ok(start) if !start.is_empty() => events.push(TelnetEvent::Send(start)),
                    Ok(_) => {}
                    Err(err) => {
                        events.push(TelnetEvent::Error(err.to_string()));
                        return;
                    }
                }
            }
            events.push(TelnetEvent::OptionGranted(option, side));
        } else if before != QState::No && after == QState::No {
            events.push(TelnetEvent::OptionDenied(option, side));
        }
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec::with_options(TelnetOptions::default())
    }
}

impl std::fmt::Debug for TelnetCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetCodec")
            .field("decoder_state", &self.decoder_state)
            .field("compressing", &self.is_compressing())
            .finish_non_exhaustive()
    }
}

fn flush_data(data: &mut BytesMut, events: &mut Vec<TelnetEvent>) {
    if !data.is_empty() {
        events.push(TelnetEvent::Data(data.split().freeze()));
    }
}

/// Position of the decoder inside the Telnet grammar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecoderState {
    NormalData,
    InterpretAsCommand,
    NegotiateDo,
    NegotiateDont,
    NegotiateWill,
    NegotiateWont,
    Subnegotiate,
    SubnegotiateArgument(TelnetOption),
    SubnegotiateArgumentIAC(TelnetOption),
}

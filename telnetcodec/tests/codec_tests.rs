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


//! Integration tests for telnetcodec
//!
//! These tests drive the codec the way a connection does: requests go out, client replies
//! come in, and the resulting events are checked in wire order.

use bytes::Bytes;
use pulsemud_telnetcodec::naws::WindowSize;
use pulsemud_telnetcodec::{
    QState, TelnetCodec, TelnetEvent, TelnetOption, TelnetOptions, TelnetSide, consts,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn sent(events: &[TelnetEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TelnetEvent::Send(bytes) => Some(bytes.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

// ============================================================================
// Server Greeting Tests
// ============================================================================

#[test]
fn client_greeting_with_window_size() {
    let mut server = TelnetCodec::new();
    server
        .negotiate(TelnetSide::Remote, TelnetOption::NAWS, true)
        .unwrap();

    let events = server.feed(&[
        consts::IAC, consts::WILL, consts::option::NAWS,
        consts::IAC, consts::SB, consts::option::NAWS, 0, 132, 0, 43, consts::IAC, consts::SE,
        b'h', b'i', b'\r', b'\n',
    ]);

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        TelnetEvent::OptionGranted(TelnetOption::NAWS, TelnetSide::Remote)
    );
    match &events[1] {
        TelnetEvent::Subnegotiation(TelnetOption::NAWS, payload) => {
            let size = WindowSize::decode(payload).unwrap();
            assert_eq!(size, WindowSize::new(132, 43));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(events[2], TelnetEvent::Data(Bytes::from_static(b"hi\r\n")));
}

#[test]
fn client_offers_are_refused_except_policy() {
    let mut server = TelnetCodec::new();
    let events = server.feed(&[
        consts::IAC, consts::WILL, consts::option::TTYPE,
        consts::IAC, consts::DO, consts::option::SGA,
        consts::IAC, consts::DO, consts::option::GMCP,
    ]);

    assert_eq!(
        sent(&events),
        vec![
            consts::IAC, consts::DONT, consts::option::TTYPE,
            consts::IAC, consts::WILL, consts::option::SGA,
            consts::IAC, consts::WONT, consts::option::GMCP,
        ]
    );
    assert!(server.is_enabled(TelnetOption::SuppressGoAhead, TelnetSide::Local));
    assert!(!server.is_enabled(TelnetOption::GMCP, TelnetSide::Local));
}

#[test]
fn repeated_offers_do_not_loop() {
    let mut server = TelnetCodec::new();
    let first = server.feed(&[consts::IAC, consts::DO, consts::option::ECHO]);
    assert_eq!(sent(&first), vec![consts::IAC, consts::WILL, consts::option::ECHO]);

    // An enabled option is not acknowledged a second time.
    let second = server.feed(&[consts::IAC, consts::DO, consts::option::ECHO]);
    assert!(second.is_empty());
    assert_eq!(
        server.options().qstate(TelnetOption::Echo, TelnetSide::Local),
        QState::Yes
    );
}

#[test]
fn empty_policy_refuses_everything() {
    let mut server = TelnetCodec::with_options(TelnetOptions::empty());
    let events = server.feed(&[consts::IAC, consts::DO, consts::option::ECHO]);
    assert_eq!(sent(&events), vec![consts::IAC, consts::WONT, consts::option::ECHO]);
}

// ============================================================================
// Compression Tests
// ============================================================================

#[test]
fn negotiation_replies_are_compressed_after_start() {
    let mut server = TelnetCodec::new();
    let events = server.feed(&[consts::IAC, consts::DO, consts::option::COMPRESS2]);
    assert_eq!(
        events,
        vec![
            TelnetEvent::Send(Bytes::from_static(&[
                consts::IAC,
                consts::WILL,
                consts::option::COMPRESS2
            ])),
            TelnetEvent::Send(Bytes::from_static(&[
                consts::IAC,
                consts::SB,
                consts::option::COMPRESS2,
                consts::IAC,
                consts::SE
            ])),
            TelnetEvent::OptionGranted(TelnetOption::Compress2, TelnetSide::Local),
        ]
    );
    assert!(server.is_compressing());

    let events = server.feed(&[consts::IAC, consts::DO, consts::option::SGA]);
    let reply = sent(&events);
    assert!(!reply.is_empty());
    assert_ne!(reply, vec![consts::IAC, consts::WILL, consts::option::SGA]);
    assert!(server.compressor().unwrap().bytes_in() >= 3);
}

// ============================================================================
// Diagnostics Tests
// ============================================================================

#[test]
fn malformed_input_is_reported_in_band() {
    let mut server = TelnetCodec::new();
    let events = server.feed(&[b'a', consts::IAC, consts::SE, b'b']);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], TelnetEvent::Warning(_)));
    assert_eq!(events[2], TelnetEvent::Data(Bytes::from_static(b"b")));
}

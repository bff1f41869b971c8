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


//! # MCCP2 Stream Deflater
//!
//! Once a Telnet peer agrees to `COMPRESS2` (option 86), every byte the server sends
//! afterwards is part of one continuous zlib stream. The stream is never finished while the
//! connection is alive; instead each chunk handed to [`Compressor::compress`] is followed by
//! a zlib sync flush so the peer can decode it immediately.
//!
//! The codec and connection layers are synchronous and non-blocking, so the async encoder
//! from `async-compression` is driven directly through its `AsyncWrite` poll methods over an
//! in-memory `Vec<u8>` sink. A `Vec` sink never returns `Pending`, which makes a single poll
//! sufficient for every operation.
//!
//! ```rust
//! use pulsemud_compress::Compressor;
//!
//! let mut compressor = Compressor::new();
//! let wire = compressor.compress(b"Welcome!\r\n").unwrap();
//! assert!(!wire.is_empty());
//! assert_eq!(compressor.bytes_in(), 10);
//! ```

use async_compression::Level;
use async_compression::tokio::write::ZlibEncoder;
use bytes::Bytes;
use futures::task::noop_waker_ref;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::trace;

/// A persistent zlib deflate stream with per-chunk sync flushing.
pub struct Compressor {
    encoder: ZlibEncoder<Vec<u8>>,
    bytes_in: u64,
    bytes_out: u64,
}

impl Compressor {
    /// Creates a deflater using the default compression level.
    pub fn new() -> Compressor {
        Compressor::with_level(Level::Default)
    }

    /// Creates a deflater using the given compression level.
    pub fn with_level(level: Level) -> Compressor {
        Compressor {
            encoder: ZlibEncoder::with_quality(Vec::new(), level),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Compresses `data` and returns every byte the stream produced for it, including the
    /// sync flush marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder reports a failure or unexpectedly stalls.
    pub fn compress(&mut self, data: &[u8]) -> io::Result<Bytes> {
        let mut written = 0;
        while written < data.len() {
            let remaining = &data[written..];
            let count = self.drive(|encoder, cx| encoder.poll_write(cx, remaining))?;
            if count == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "compressor accepted no input",
                ));
            }
            written += count;
        }
        self.drive(|encoder, cx| encoder.poll_flush(cx))?;

        let output = std::mem::take(self.encoder.get_mut());
        self.bytes_in += data.len() as u64;
        self.bytes_out += output.len() as u64;
        trace!(input = data.len(), output = output.len(), "compressed chunk");
        Ok(Bytes::from(output))
    }

    /// Total uncompressed bytes accepted so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total compressed bytes produced so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    fn drive<T>(
        &mut self,
        op: impl FnOnce(Pin<&mut ZlibEncoder<Vec<u8>>>, &mut Context<'_>) -> Poll<io::Result<T>>,
    ) -> io::Result<T> {
        let mut cx = Context::from_waker(noop_waker_ref());
        match op(Pin::new(&mut self.encoder), &mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "compressor stalled on an in-memory sink",
            )),
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor::new()
    }
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("bytes_in", &self.bytes_in)
            .field("bytes_out", &self.bytes_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::bufread::ZlibDecoder;
    use tokio::io::AsyncReadExt;

    async fn inflate(stream: &[u8], expected_len: usize) -> Vec<u8> {
        let mut decoder = ZlibDecoder::new(stream);
        let mut output = vec![0u8; expected_len];
        decoder.read_exact(&mut output).await.unwrap();
        output
    }

    #[tokio::test]
    async fn test_single_chunk_is_decodable_without_finishing() {
        let mut compressor = Compressor::new();
        let wire = compressor.compress(b"You see a dark room.\r\n").unwrap();
        assert_eq!(inflate(&wire, 22).await, b"You see a dark room.\r\n");
    }

    #[tokio::test]
    async fn test_chunks_form_one_continuous_stream() {
        let mut compressor = Compressor::new();
        let mut wire = Vec::new();
        wire.extend_from_slice(&compressor.compress(b"first ").unwrap());
        wire.extend_from_slice(&compressor.compress(b"second").unwrap());
        assert_eq!(inflate(&wire, 12).await, b"first second");
    }

    #[test]
    fn test_counters_track_both_sides() {
        let mut compressor = Compressor::new();
        let payload = vec![b'a'; 2048];
        let wire = compressor.compress(&payload).unwrap();
        assert_eq!(compressor.bytes_in(), 2048);
        assert_eq!(compressor.bytes_out(), wire.len() as u64);
        assert!(compressor.bytes_out() < compressor.bytes_in());
    }
}

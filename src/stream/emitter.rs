//! Event channel and NDJSON transport.
//!
//! The agent loop publishes into an `EventSink`; a transport task drains the
//! receiving end and writes one JSON object per line. The channel is bounded,
//! so a slow consumer stalls the loop at the point of emission.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, FramedWrite};

use super::event::StreamEvent;
use crate::error::Result;

/// Default channel capacity between the loop and the transport.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Publishing half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Create a bounded channel and return both ends.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publish one event. Waits while the channel is full.
    ///
    /// Returns `false` once the receiving side has gone away.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        let tag = event.tag();
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                log::debug!("event receiver closed, dropping {}", tag);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Newline-delimited JSON codec.
///
/// Frames are one JSON document per `\n`-terminated line.
#[derive(Debug)]
pub struct NdjsonCodec<T> {
    _phantom: PhantomData<T>,
    max_length: usize,
}

impl<T> NdjsonCodec<T> {
    /// Create a new codec with default max line length (16 MB).
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            _phantom: PhantomData,
            max_length,
        }
    }
}

impl<T> Default for NdjsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for NdjsonCodec<T> {
    type Item = T;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Line too long: {} > {}", src.len(), self.max_length),
                    ));
                }
                return Ok(None);
            };

            let line = src.split_to(newline + 1);
            let line = &line[..newline];
            // blank lines are keep-alives
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return serde_json::from_slice(line)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)));
        }
    }
}

impl<T: Serialize> Encoder<T> for NdjsonCodec<T> {
    type Error = std::io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        if json.len() > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Message too large: {} > {}", json.len(), self.max_length),
            ));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Drain `rx` into `writer` as NDJSON until the channel closes.
///
/// Each event is flushed as soon as it is written. Returns the terminal event,
/// if one was seen.
pub async fn write_ndjson<W>(rx: mpsc::Receiver<StreamEvent>, writer: W) -> Result<Option<StreamEvent>>
where
    W: AsyncWrite + Unpin,
{
    write_ndjson_with_limit(rx, writer, DEFAULT_MAX_LINE_LENGTH).await
}

/// `write_ndjson` with an explicit per-line limit.
///
/// An event that does not fit is replaced rather than dropped: a `done` is
/// resent with its log outputs shortened, and if that still does not fit it
/// becomes an `error`. Other events become a `status` note. The stream thus
/// keeps exactly one terminal line.
pub async fn write_ndjson_with_limit<W>(
    mut rx: mpsc::Receiver<StreamEvent>,
    writer: W,
    max_line_length: usize,
) -> Result<Option<StreamEvent>>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, NdjsonCodec::<StreamEvent>::with_max_length(max_line_length));
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        let mut next = Some(event);
        let mut attempt = 0;
        while let Some(candidate) = next.take() {
            let tag = candidate.tag();
            let retained = candidate.is_terminal().then(|| candidate.clone());
            match framed.send(candidate).await {
                Ok(()) => {
                    if retained.is_some() {
                        terminal = retained;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData && attempt < MAX_REPLACEMENTS => {
                    log::warn!("{} event could not be written: {}", tag, e);
                    next = Some(replacement(retained, tag, &e, attempt, max_line_length));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(terminal)
}

/// Default per-line limit (16 MB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

const MAX_REPLACEMENTS: u32 = 2;

fn replacement(
    original: Option<StreamEvent>,
    tag: &str,
    err: &std::io::Error,
    attempt: u32,
    max_line_length: usize,
) -> StreamEvent {
    match original {
        Some(StreamEvent::Done(done)) if attempt == 0 => {
            // leave three quarters of the line for everything but outputs
            let per_log = max_line_length / 4 / done.log_count().max(1);
            StreamEvent::Done(done.compacted(per_log))
        }
        Some(_) => StreamEvent::error(format!("{} event could not be written: {}", tag, err)),
        None => StreamEvent::status(format!("{} event omitted: {}", tag, err)),
    }
}

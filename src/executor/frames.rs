//! Docker attach-stream demultiplexing.
//!
//! Without a TTY the engine interleaves stdout and stderr as frames with an
//! 8-byte header: `[stream, 0, 0, 0, size_be_u32]` followed by `size` bytes.
//! Streams with a TTY (or proxies that strip framing) arrive raw.

use bytes::{Buf, Bytes};

const HEADER_LEN: usize = 8;

/// Whether `data` starts with a plausible frame header.
pub fn looks_multiplexed(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data[0] <= 2 && data[1..4] == [0, 0, 0]
}

/// Decode a complete attach stream into combined text, in arrival order.
pub fn demux(data: Bytes) -> String {
    if !looks_multiplexed(&data) {
        return String::from_utf8_lossy(&data).into_owned();
    }

    let mut buf = data;
    let mut out = Vec::with_capacity(buf.len());
    while buf.remaining() >= HEADER_LEN {
        let _stream = buf.get_u8();
        buf.advance(3);
        let size = buf.get_u32() as usize;
        let take = size.min(buf.remaining());
        out.extend_from_slice(&buf.split_to(take));
    }
    // trailing partial header is dropped
    String::from_utf8_lossy(&out).into_owned()
}

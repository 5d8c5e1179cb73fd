//! Chunk stream codec
//!
//! Messages travel as chunks so several logical channels can share one
//! socket. Each chunk stream id keeps the header fields of its last chunk;
//! later chunks on the same id send only what changed.
//!
//! ```text
//! +--------------+------------------+--------------------+------------+
//! | basic header | message header   | extended timestamp | chunk data |
//! | 1-3 bytes    | 11 / 7 / 3 / 0   | 0 or 4 bytes       |            |
//! +--------------+------------------+--------------------+------------+
//!
//! basic header:  fmt(2) csid(6)            csid 2..=63
//!                fmt(2) 0 csid-64(8)       csid 64..=319
//!                fmt(2) 1 csid-64(16 LE)   csid 64..=65599
//!
//! fmt 0: timestamp(3) length(3) type(1) stream id(4, little-endian)
//! fmt 1: delta(3) length(3) type(1)
//! fmt 2: delta(3)
//! fmt 3: nothing; everything comes from the chunk stream's last header
//! ```
//!
//! A timestamp field of 0xFFFFFF announces a 4-byte extended field. The
//! flag sticks to the chunk stream, so type 3 chunks that follow also
//! carry the extension.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// One complete message, reassembled from its chunks
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub csid: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    pub message_type: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Inbound state for one chunk stream id
#[derive(Debug, Default)]
struct ChunkStreamContext {
    /// Timestamp of the message being (or last) assembled
    timestamp: u32,
    /// Delta applied when a type 3 chunk starts a new message
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    /// Last explicit header used the extended timestamp field
    extended: bool,
    /// A type 0 header has been seen on this id
    has_header: bool,
    /// Payload collected so far for the current message
    partial: BytesMut,
}

/// Decoded fields of one chunk header, before anything is consumed
struct ChunkHeader {
    fmt: u8,
    csid: u32,
    /// Basic header + message header + extended timestamp
    header_len: usize,
    /// Raw 3-byte field, or the extended value when present
    timestamp: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
}

/// Chunk stream decoder
///
/// Feed it the session's read buffer. Bytes are only consumed once a whole
/// chunk (header and data) is available, so a short read never leaves the
/// buffer mid-chunk.
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    streams: HashMap<u32, ChunkStreamContext>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Apply a SetChunkSize from the peer. Bounds are checked by the caller.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size;
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_max_message_size(&mut self, size: u32) {
        self.max_message_size = size;
    }

    /// Drop the partially assembled message on `csid` (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(ctx) = self.streams.get_mut(&csid) {
            ctx.partial.clear();
        }
    }

    /// Decode chunks until one message completes
    ///
    /// Returns `Ok(None)` when the buffer holds no further complete chunk.
    /// Chunks that only extend a message are consumed along the way.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            let header = match self.peek_header(buf)? {
                Some(header) => header,
                None => return Ok(None),
            };

            let ctx = self.streams.entry(header.csid).or_default();
            let continuing = !ctx.partial.is_empty();

            if continuing && header.fmt != CHUNK_FMT_3 {
                tracing::warn!(
                    csid = header.csid,
                    dropped = ctx.partial.len(),
                    "New message header before previous message completed"
                );
                ctx.partial.clear();
            }
            let continuing = continuing && header.fmt == CHUNK_FMT_3;

            let message_length = match header.fmt {
                CHUNK_FMT_0 | CHUNK_FMT_1 => header.message_length,
                _ => ctx.message_length,
            };
            if message_length > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: message_length,
                    max: self.max_message_size,
                }
                .into());
            }

            let collected = ctx.partial.len() as u32;
            let data_len = (message_length - collected).min(self.chunk_size) as usize;
            if buf.len() < header.header_len + data_len {
                return Ok(None);
            }

            // The whole chunk is buffered; commit it
            buf.advance(header.header_len);
            match header.fmt {
                CHUNK_FMT_0 => {
                    ctx.timestamp = header.timestamp;
                    ctx.timestamp_delta = header.timestamp;
                    ctx.message_length = header.message_length;
                    ctx.message_type = header.message_type;
                    ctx.stream_id = header.stream_id;
                    ctx.extended = header.extended;
                    ctx.has_header = true;
                }
                CHUNK_FMT_1 => {
                    ctx.timestamp_delta = header.timestamp;
                    ctx.timestamp = ctx.timestamp.wrapping_add(header.timestamp);
                    ctx.message_length = header.message_length;
                    ctx.message_type = header.message_type;
                    ctx.extended = header.extended;
                }
                CHUNK_FMT_2 => {
                    ctx.timestamp_delta = header.timestamp;
                    ctx.timestamp = ctx.timestamp.wrapping_add(header.timestamp);
                    ctx.extended = header.extended;
                }
                _ => {
                    if !continuing {
                        ctx.timestamp = ctx.timestamp.wrapping_add(ctx.timestamp_delta);
                    }
                }
            }

            ctx.partial.reserve(data_len);
            ctx.partial.put_slice(&buf[..data_len]);
            buf.advance(data_len);

            if ctx.partial.len() as u32 >= ctx.message_length {
                return Ok(Some(RawMessage {
                    csid: header.csid,
                    timestamp: ctx.timestamp,
                    message_type: ctx.message_type,
                    stream_id: ctx.stream_id,
                    payload: ctx.partial.split().freeze(),
                }));
            }
        }
    }

    /// Parse the next chunk header without consuming it
    fn peek_header(&self, buf: &[u8]) -> Result<Option<ChunkHeader>> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(None),
        };

        let ctx = self.streams.get(&csid);
        if fmt != CHUNK_FMT_0 && !ctx.map_or(false, |c| c.has_header) {
            return Err(ProtocolError::MissingChunkHeader(csid).into());
        }

        let message_header_len = match fmt {
            CHUNK_FMT_0 => 11,
            CHUNK_FMT_1 => 7,
            CHUNK_FMT_2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + message_header_len {
            return Ok(None);
        }

        let mut header = &buf[basic_len..basic_len + message_header_len];
        let mut timestamp = 0;
        let mut message_length = 0;
        let mut message_type = 0;
        let mut stream_id = 0;
        if fmt != CHUNK_FMT_3 {
            timestamp = header.get_uint(3) as u32;
        }
        if fmt == CHUNK_FMT_0 || fmt == CHUNK_FMT_1 {
            message_length = header.get_uint(3) as u32;
            message_type = header.get_u8();
        }
        if fmt == CHUNK_FMT_0 {
            stream_id = header.get_u32_le();
        }

        let extended = match fmt {
            CHUNK_FMT_3 => ctx.map_or(false, |c| c.extended),
            _ => timestamp >= EXTENDED_TIMESTAMP_THRESHOLD,
        };

        let mut header_len = basic_len + message_header_len;
        if extended {
            if buf.len() < header_len + 4 {
                return Ok(None);
            }
            let ext = (&buf[header_len..header_len + 4]).get_u32();
            // Type 3 chunks repeat the extended value; the delta is already known
            if fmt != CHUNK_FMT_3 {
                timestamp = ext;
            }
            header_len += 4;
        }

        Ok(Some(ChunkHeader {
            fmt,
            csid,
            header_len,
            timestamp,
            message_length,
            message_type,
            stream_id,
            extended,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `(fmt, csid, basic header length)`, or None if incomplete
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => Some((fmt, 64 + *buf.get(1)? as u32, 2)),
        1 => {
            let low = *buf.get(1)? as u32;
            let high = *buf.get(2)? as u32;
            Some((fmt, 64 + low + high * 256, 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

/// Outbound state for one chunk stream id
#[derive(Debug, Default)]
struct EncoderContext {
    timestamp: u32,
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
    has_header: bool,
}

/// Chunk stream encoder
///
/// Picks the smallest header the previous message on the same chunk stream
/// allows, mirroring the decoder's bookkeeping so the two stay in step.
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, EncoderContext>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Append the chunks for `msg` to `buf`
    pub fn encode(&mut self, msg: &RawMessage, buf: &mut BytesMut) {
        self.encode_parts(
            msg.csid,
            msg.timestamp,
            msg.message_type,
            msg.stream_id,
            &msg.payload,
            buf,
        );
    }

    /// Same as [`ChunkEncoder::encode`] for callers holding the header
    /// fields and a borrowed payload
    pub fn encode_parts(
        &mut self,
        csid: u32,
        timestamp: u32,
        message_type: u8,
        stream_id: u32,
        payload: &[u8],
        buf: &mut BytesMut,
    ) {
        let ctx = self.streams.entry(csid).or_default();
        let length = payload.len() as u32;
        let delta = timestamp.wrapping_sub(ctx.timestamp);

        let fmt = if !ctx.has_header || stream_id != ctx.stream_id || timestamp < ctx.timestamp {
            CHUNK_FMT_0
        } else if message_type != ctx.message_type || length != ctx.message_length {
            CHUNK_FMT_1
        } else if delta == ctx.timestamp_delta {
            CHUNK_FMT_3
        } else {
            CHUNK_FMT_2
        };

        let (field, extended) = match fmt {
            CHUNK_FMT_0 => (timestamp, timestamp >= EXTENDED_TIMESTAMP_THRESHOLD),
            CHUNK_FMT_3 => (ctx.timestamp_delta, ctx.extended),
            _ => (delta, delta >= EXTENDED_TIMESTAMP_THRESHOLD),
        };
        let short_field = field.min(EXTENDED_TIMESTAMP_THRESHOLD);

        ctx.timestamp = timestamp;
        ctx.timestamp_delta = if fmt == CHUNK_FMT_0 { timestamp } else { delta };
        ctx.message_length = length;
        ctx.message_type = message_type;
        ctx.stream_id = stream_id;
        ctx.extended = extended;
        ctx.has_header = true;

        let chunk_size = self.chunk_size as usize;
        buf.reserve(payload.len() + 18 + payload.len() / chunk_size * 8);

        let mut offset = 0;
        let mut first = true;
        loop {
            let take = (payload.len() - offset).min(chunk_size);
            write_basic_header(csid, if first { fmt } else { CHUNK_FMT_3 }, buf);
            if first {
                if fmt != CHUNK_FMT_3 {
                    write_u24(short_field, buf);
                }
                if fmt == CHUNK_FMT_0 || fmt == CHUNK_FMT_1 {
                    write_u24(length, buf);
                    buf.put_u8(message_type);
                }
                if fmt == CHUNK_FMT_0 {
                    buf.put_u32_le(stream_id);
                }
            }
            if extended {
                buf.put_u32(field);
            }
            buf.put_slice(&payload[offset..offset + take]);
            offset += take;
            first = false;
            if offset >= payload.len() {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 320 {
        let id = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8((id & 0xFF) as u8);
        buf.put_u8((id >> 8) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_uint(value as u64 & 0xFF_FFFF, 3);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(csid: u32, timestamp: u32, len: usize) -> RawMessage {
        RawMessage {
            csid,
            timestamp,
            message_type: MSG_VIDEO,
            stream_id: 1,
            payload: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
        }
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<RawMessage> {
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_basic_header_forms() {
        assert_eq!(parse_basic_header(&[0x03]), Some((0, 3, 1)));
        assert_eq!(parse_basic_header(&[0xC0, 0x00]), Some((3, 64, 2)));
        assert_eq!(parse_basic_header(&[0x41, 0x00, 0x01]), Some((1, 320, 3)));
        assert_eq!(parse_basic_header(&[0x41, 0x00]), None);

        for csid in [2u32, 63, 64, 319, 320, MAX_CSID] {
            let mut buf = BytesMut::new();
            write_basic_header(csid, 2, &mut buf);
            assert_eq!(parse_basic_header(&buf), Some((2, csid, buf.len())));
        }
    }

    #[test]
    fn test_reassembly_across_chunk_sizes() {
        for chunk_size in [1u32, 128, 300, 4096] {
            for len in [0usize, 1, 127, 128, 129, 1000, 9000] {
                let mut encoder = ChunkEncoder::new();
                let mut decoder = ChunkDecoder::new();
                encoder.set_chunk_size(chunk_size);
                decoder.set_chunk_size(chunk_size);

                let original = message(CSID_VIDEO, 40, len);
                let mut wire = BytesMut::new();
                encoder.encode(&original, &mut wire);

                let decoded = decode_all(&mut decoder, &mut wire);
                assert_eq!(decoded, vec![original], "chunk {} len {}", chunk_size, len);
                assert!(wire.is_empty());
            }
        }
    }

    #[test]
    fn test_partial_input_consumes_nothing() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&message(CSID_VIDEO, 0, 100), &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut partial = BytesMut::from(&wire[..50]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 50);

        partial.extend_from_slice(&wire[50..]);
        assert_eq!(decoder.decode(&mut partial).unwrap().unwrap().payload.len(), 100);
    }

    #[test]
    fn test_header_compression_sequence() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        // fmt 0, then fmt 1 (length changes), fmt 2 (delta changes), fmt 3 (same delta)
        let sent = vec![
            message(CSID_AUDIO, 100, 10),
            message(CSID_AUDIO, 123, 12),
            message(CSID_AUDIO, 150, 12),
            message(CSID_AUDIO, 177, 12),
        ];
        let mut header_bytes = Vec::new();
        for msg in &sent {
            let before = wire.len();
            encoder.encode(msg, &mut wire);
            header_bytes.push(wire.len() - before - msg.payload.len());
        }
        assert_eq!(header_bytes, vec![12, 8, 4, 1]);

        assert_eq!(decode_all(&mut decoder, &mut wire), sent);
    }

    #[test]
    fn test_type3_after_type0_uses_timestamp_as_delta() {
        let mut wire = BytesMut::new();
        // fmt 0, csid 4, ts 20, len 1, type 8, sid 1
        wire.put_slice(&[0x04, 0, 0, 20, 0, 0, 1, MSG_AUDIO, 1, 0, 0, 0, 0xAA]);
        // fmt 3 new message on csid 4
        wire.put_slice(&[0xC4, 0xBB]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut wire);
        assert_eq!(out[0].timestamp, 20);
        assert_eq!(out[1].timestamp, 40);
        assert_eq!(&out[1].payload[..], &[0xBB]);
    }

    #[test]
    fn test_extended_timestamp_threshold() {
        for timestamp in [0xFF_FFFEu32, 0xFF_FFFF, 0x0100_0000, 0xFFFF_FFF0] {
            let mut encoder = ChunkEncoder::new();
            let original = message(CSID_VIDEO, timestamp, 300);
            let mut wire = BytesMut::new();
            encoder.encode(&original, &mut wire);

            let field = ((wire[1] as u32) << 16) | ((wire[2] as u32) << 8) | wire[3] as u32;
            if timestamp >= 0xFF_FFFF {
                assert_eq!(field, 0xFF_FFFF);
                assert_eq!((&wire[12..16]).get_u32(), timestamp);
                // Continuation chunk repeats the extended field after its 1-byte header
                let second = 1 + 11 + 4 + 128;
                assert_eq!((&wire[second + 1..second + 5]).get_u32(), timestamp);
            } else {
                assert_eq!(field, timestamp);
            }

            let mut decoder = ChunkDecoder::new();
            assert_eq!(decode_all(&mut decoder, &mut wire), vec![original]);
        }
    }

    #[test]
    fn test_extended_delta_roundtrip() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        let sent = vec![
            message(CSID_VIDEO, 10, 5),
            message(CSID_VIDEO, 10 + 0xFF_FFFF, 5),
            message(CSID_VIDEO, 10 + 2 * 0xFF_FFFF, 5),
        ];
        for msg in &sent {
            encoder.encode(msg, &mut wire);
        }
        assert_eq!(decode_all(&mut decoder, &mut wire), sent);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let mut encoder = ChunkEncoder::new();
        let audio = message(CSID_AUDIO, 0, 300);
        let video = message(CSID_VIDEO, 0, 300);
        let mut a = BytesMut::new();
        let mut v = BytesMut::new();
        encoder.encode(&audio, &mut a);
        encoder.encode(&video, &mut v);

        // Interleave the first chunk of each, then the rest
        let first = 12 + 128;
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&a[..first]);
        wire.extend_from_slice(&v[..first]);
        wire.extend_from_slice(&a[first..]);
        wire.extend_from_slice(&v[first..]);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![audio, video]);
    }

    #[test]
    fn test_type3_without_header_is_error() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::from(&[0xC5u8, 0x00][..]);
        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(err.to_string().contains("chunk stream 5"));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut decoder = ChunkDecoder::new();
        decoder.set_max_message_size(1000);
        let mut wire = BytesMut::new();
        wire.put_slice(&[0x06, 0, 0, 0, 0x00, 0x10, 0x00, MSG_VIDEO, 1, 0, 0, 0]);
        assert!(decoder.decode(&mut wire).is_err());
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&message(CSID_VIDEO, 0, 200), &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut first = BytesMut::from(&wire[..12 + 128]);
        assert!(decoder.decode(&mut first).unwrap().is_none());
        assert!(first.is_empty());
        decoder.abort(CSID_VIDEO);

        // A fresh full message on the same id decodes cleanly
        let mut next = BytesMut::new();
        let mut encoder = ChunkEncoder::new();
        let fresh = message(CSID_VIDEO, 5, 20);
        encoder.encode(&fresh, &mut next);
        assert_eq!(decoder.decode(&mut next).unwrap(), Some(fresh));
    }
}

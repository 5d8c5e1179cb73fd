//! Server side of the RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|  AwaitC0
//!   |------- C1 (1536 bytes) -------------->|  AwaitC1
//!   |<------ S0 + S1 + S2 ------------------|
//!   |------- C2 (1536 bytes) -------------->|  AwaitC2
//!   |                                        |  Done
//! ```
//!
//! Flash-era clients send a "complex" C1 carrying an HMAC-SHA256 digest.
//! The 1536-byte block is `time(4) version(4)` followed by a 764-byte key
//! block and a 764-byte digest block; schema 0 puts the key block first,
//! schema 1 puts the digest block first. The digest position inside its
//! block is derived from the block's first four bytes:
//!
//! ```text
//! digest block: offset(4) random(offset) digest(32) random(728 - offset)
//! key block:    random(offset) key(128) random(632 - offset - 4) offset(4)
//! ```
//!
//! When neither schema verifies, the plain handshake is used: S1 is random
//! and S2 echoes C1. The public key in the key block is handed back as-is;
//! there is no real Diffie-Hellman exchange.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LEN: usize = 32;
const KEY_LEN: usize = 128;
const BLOCK_LEN: usize = 764;

/// Shared 32-byte tail of both handshake keys
const KEY_TAIL: [u8; 32] = [
    0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E, 0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E,
    0x57, 0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB, 0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB,
    0x31, 0xAE,
];

const FP_KEY_TEXT: &[u8; 30] = b"Genuine Adobe Flash Player 001";
const FMS_KEY_TEXT: &[u8; 36] = b"Genuine Adobe Flash Media Server 001";

/// Version bytes advertised in S1 by a complex-handshake server
const SERVER_VERSION: [u8; 4] = [0x04, 0x05, 0x00, 0x01];

/// Client ("Flash Player") key; C1 digests use the first 30 bytes
pub fn client_key() -> [u8; 62] {
    concat_key(FP_KEY_TEXT)
}

/// Server ("Flash Media Server") key; S1 digests use the first 36 bytes,
/// the S2 key derivation uses all 68
pub fn server_key() -> [u8; 68] {
    concat_key(FMS_KEY_TEXT)
}

fn concat_key<const T: usize, const N: usize>(text: &[u8; T]) -> [u8; N] {
    let mut key = [0u8; N];
    key[..T].copy_from_slice(text);
    key[T..].copy_from_slice(&KEY_TAIL);
    key
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitC0,
    AwaitC1,
    AwaitC2,
    Done,
}

/// Which C1 layout the client used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeSchema {
    /// Key block, then digest block
    Schema0,
    /// Digest block, then key block
    Schema1,
    /// No digest; plain echo handshake
    Simple,
}

impl HandshakeSchema {
    fn digest_block_start(self) -> usize {
        match self {
            HandshakeSchema::Schema1 => 8,
            _ => 8 + BLOCK_LEN,
        }
    }

    fn key_block_start(self) -> usize {
        match self {
            HandshakeSchema::Schema1 => 8 + BLOCK_LEN,
            _ => 8,
        }
    }

    /// Absolute position of the 32-byte digest inside a 1536-byte block
    pub fn digest_offset(self, block: &[u8]) -> usize {
        let start = self.digest_block_start();
        let sum: usize = block[start..start + 4].iter().map(|&b| b as usize).sum();
        sum % (BLOCK_LEN - DIGEST_LEN - 4) + start + 4
    }

    /// Absolute position of the 128-byte public key inside a 1536-byte block
    pub fn key_offset(self, block: &[u8]) -> usize {
        let start = self.key_block_start();
        let tail = start + BLOCK_LEN - 4;
        let sum: usize = block[tail..tail + 4].iter().map(|&b| b as usize).sum();
        sum % (BLOCK_LEN - KEY_LEN - 4) + start
    }
}

/// Server handshake state machine
///
/// Feed it the connection's read buffer with [`Handshake::process`] until
/// [`Handshake::is_done`]; any bytes after C2 stay in the buffer for the
/// chunk decoder.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    schema: Option<HandshakeSchema>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitC0,
            schema: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Schema picked when C1 was processed
    pub fn schema(&self) -> Option<HandshakeSchema> {
        self.schema
    }

    /// Bytes still required to leave the current state
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::AwaitC0 => 1,
            HandshakeState::AwaitC1 | HandshakeState::AwaitC2 => HANDSHAKE_SIZE,
            HandshakeState::Done => 0,
        }
    }

    /// Advance as far as the buffered input allows
    ///
    /// Returns S0+S1+S2 once C1 has been consumed.
    pub fn process(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let mut response = None;
        loop {
            match self.state {
                HandshakeState::AwaitC0 => {
                    if buf.is_empty() {
                        break;
                    }
                    let version = buf.get_u8();
                    if version != RTMP_VERSION {
                        tracing::debug!(version, "Client sent non-standard RTMP version");
                    }
                    self.state = HandshakeState::AwaitC1;
                }
                HandshakeState::AwaitC1 => {
                    if buf.len() < HANDSHAKE_SIZE {
                        break;
                    }
                    let c1 = buf.split_to(HANDSHAKE_SIZE);
                    let (schema, reply) = respond_to_c1(&c1)?;
                    self.schema = Some(schema);
                    self.state = HandshakeState::AwaitC2;
                    response = Some(reply);
                }
                HandshakeState::AwaitC2 => {
                    if buf.len() < HANDSHAKE_SIZE {
                        break;
                    }
                    // C2 is not validated; clients disagree on its contents
                    buf.advance(HANDSHAKE_SIZE);
                    self.state = HandshakeState::Done;
                }
                HandshakeState::Done => break,
            }
        }
        Ok(response)
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a C1 block against both complex schemas
///
/// Returns the matching schema and the client's digest.
pub fn validate_c1(c1: &[u8]) -> Option<(HandshakeSchema, [u8; DIGEST_LEN])> {
    if c1.len() != HANDSHAKE_SIZE {
        return None;
    }
    let key = client_key();
    [HandshakeSchema::Schema0, HandshakeSchema::Schema1]
        .into_iter()
        .find_map(|schema| {
            let offset = schema.digest_offset(c1);
            let expected = digest_excluding(&key[..30], c1, offset);
            (c1[offset..offset + DIGEST_LEN] == expected).then_some((schema, expected))
        })
}

/// HMAC over `block` with the 32 bytes at `offset` left out
pub fn digest_excluding(key: &[u8], block: &[u8], offset: usize) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(&block[..offset]);
    mac.update(&block[offset + DIGEST_LEN..]);
    finish(mac)
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    finish(mac)
}

fn finish(mac: HmacSha256) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Build S0+S1+S2 for the given C1
fn respond_to_c1(c1: &[u8]) -> Result<(HandshakeSchema, Bytes)> {
    if c1.len() != HANDSHAKE_SIZE {
        return Err(HandshakeError::InvalidPacketSize {
            expected: HANDSHAKE_SIZE,
            actual: c1.len(),
        }
        .into());
    }

    let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
    out.put_u8(RTMP_VERSION);

    let schema = match validate_c1(c1) {
        Some((schema, c1_digest)) => {
            out.put_slice(&complex_s1(schema, c1));
            out.put_slice(&complex_s2(&c1_digest));
            tracing::debug!(?schema, "Complex handshake");
            schema
        }
        None => {
            out.put_slice(&simple_s1());
            // S2 echoes C1 verbatim
            out.put_slice(c1);
            tracing::debug!("Simple handshake");
            HandshakeSchema::Simple
        }
    };
    Ok((schema, out.freeze()))
}

fn simple_s1() -> [u8; HANDSHAKE_SIZE] {
    let mut s1 = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut s1[8..]);
    s1[..4].copy_from_slice(&epoch_millis().to_be_bytes());
    s1
}

fn complex_s1(schema: HandshakeSchema, c1: &[u8]) -> [u8; HANDSHAKE_SIZE] {
    let mut s1 = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut s1[8..]);
    s1[..4].copy_from_slice(&epoch_millis().to_be_bytes());
    s1[4..8].copy_from_slice(&SERVER_VERSION);

    let client_key_at = schema.key_offset(c1);
    let our_key_at = schema.key_offset(&s1);
    s1[our_key_at..our_key_at + KEY_LEN].copy_from_slice(&c1[client_key_at..client_key_at + KEY_LEN]);

    let digest_at = schema.digest_offset(&s1);
    let digest = digest_excluding(&server_key()[..36], &s1, digest_at);
    s1[digest_at..digest_at + DIGEST_LEN].copy_from_slice(&digest);
    s1
}

fn complex_s2(c1_digest: &[u8; DIGEST_LEN]) -> [u8; HANDSHAKE_SIZE] {
    let mut s2 = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut s2);
    let temp_key = hmac(&server_key(), c1_digest);
    let signed = HANDSHAKE_SIZE - DIGEST_LEN;
    let digest = hmac(&temp_key, &s2[..signed]);
    s2[signed..].copy_from_slice(&digest);
    s2
}

fn epoch_millis() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a C1 the way a Flash Player would for `schema`
    fn complex_c1(schema: HandshakeSchema, seed: u8) -> Vec<u8> {
        let mut c1: Vec<u8> = (0..HANDSHAKE_SIZE)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        c1[4..8].copy_from_slice(&[0x80, 0x00, 0x07, 0x02]);
        let offset = schema.digest_offset(&c1);
        let digest = digest_excluding(&client_key()[..30], &c1, offset);
        c1[offset..offset + DIGEST_LEN].copy_from_slice(&digest);
        c1
    }

    fn run_c0_c1(c1: &[u8]) -> (Handshake, Bytes) {
        let mut hs = Handshake::new();
        let mut buf = BytesMut::new();
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(c1);
        let reply = hs.process(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        (hs, reply)
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(&client_key()[..30], FP_KEY_TEXT);
        assert_eq!(client_key().len(), 62);
        assert_eq!(&server_key()[..36], FMS_KEY_TEXT);
        assert_eq!(&server_key()[36..], &KEY_TAIL);
    }

    #[test]
    fn test_offsets_stay_inside_blocks() {
        let block = [0xFFu8; HANDSHAKE_SIZE];
        let d0 = HandshakeSchema::Schema0.digest_offset(&block);
        let d1 = HandshakeSchema::Schema1.digest_offset(&block);
        assert_eq!(d0, (0xFF * 4) % 728 + 776);
        assert_eq!(d1, (0xFF * 4) % 728 + 12);
        assert!(d0 + DIGEST_LEN <= HANDSHAKE_SIZE);
        assert!(d1 + DIGEST_LEN <= 8 + BLOCK_LEN);

        let k0 = HandshakeSchema::Schema0.key_offset(&block);
        let k1 = HandshakeSchema::Schema1.key_offset(&block);
        assert_eq!(k0, (0xFF * 4) % 632 + 8);
        assert_eq!(k1, (0xFF * 4) % 632 + 772);
    }

    #[test]
    fn test_complex_schemas_validate() {
        for schema in [HandshakeSchema::Schema0, HandshakeSchema::Schema1] {
            for seed in [0u8, 7, 200] {
                let c1 = complex_c1(schema, seed);
                let (found, _) = validate_c1(&c1).unwrap();
                assert_eq!(found, schema);
            }
        }
    }

    #[test]
    fn test_corrupted_digest_falls_through() {
        let mut c1 = complex_c1(HandshakeSchema::Schema0, 3);
        let offset = HandshakeSchema::Schema0.digest_offset(&c1);
        c1[offset + 5] ^= 0x01;
        assert!(validate_c1(&c1).is_none());

        let (hs, reply) = run_c0_c1(&c1);
        assert_eq!(hs.schema(), Some(HandshakeSchema::Simple));
        // S2 echoes C1
        assert_eq!(&reply[1 + HANDSHAKE_SIZE..], &c1[..]);
    }

    #[test]
    fn test_complex_response_digests() {
        for schema in [HandshakeSchema::Schema0, HandshakeSchema::Schema1] {
            let c1 = complex_c1(schema, 42);
            let (_, c1_digest) = validate_c1(&c1).unwrap();
            let (hs, reply) = run_c0_c1(&c1);
            assert_eq!(hs.schema(), Some(schema));
            assert_eq!(reply.len(), 1 + 2 * HANDSHAKE_SIZE);
            assert_eq!(reply[0], RTMP_VERSION);

            let s1 = &reply[1..1 + HANDSHAKE_SIZE];
            let at = schema.digest_offset(s1);
            let expected = digest_excluding(&server_key()[..36], s1, at);
            assert_eq!(&s1[at..at + DIGEST_LEN], &expected);

            // The client's public key is embedded unmodified
            let ck = schema.key_offset(&c1);
            let sk = schema.key_offset(s1);
            assert_eq!(&s1[sk..sk + KEY_LEN], &c1[ck..ck + KEY_LEN]);

            let s2 = &reply[1 + HANDSHAKE_SIZE..];
            let temp_key = hmac(&server_key(), &c1_digest);
            assert_eq!(&s2[1504..], &hmac(&temp_key, &s2[..1504]));
        }
    }

    #[test]
    fn test_state_machine_with_split_input() {
        let mut hs = Handshake::new();
        let mut buf = BytesMut::new();
        assert!(hs.process(&mut buf).unwrap().is_none());
        assert_eq!(hs.state(), HandshakeState::AwaitC0);

        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&[0u8; 1000]);
        assert!(hs.process(&mut buf).unwrap().is_none());
        assert_eq!(hs.state(), HandshakeState::AwaitC1);
        assert_eq!(hs.bytes_needed(), HANDSHAKE_SIZE);

        buf.put_slice(&[0u8; 536]);
        let reply = hs.process(&mut buf).unwrap().unwrap();
        assert_eq!(reply.len(), 1 + 2 * HANDSHAKE_SIZE);
        assert_eq!(hs.state(), HandshakeState::AwaitC2);

        // C2 plus the first bytes of the chunk stream
        buf.put_slice(&[0u8; HANDSHAKE_SIZE]);
        buf.put_slice(&[0x03, 0x00]);
        assert!(hs.process(&mut buf).unwrap().is_none());
        assert!(hs.is_done());
        assert_eq!(&buf[..], &[0x03, 0x00]);
    }
}

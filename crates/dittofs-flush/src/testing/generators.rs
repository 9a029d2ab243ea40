//! Payload generators sized to block granularity.

use bytes::Bytes;
use rand::RngCore;

use dittofs_store::BLOCK_SIZE;

/// Deterministic patterned payload: byte `i` is `tag ^ (i % 251)`.
///
/// Distinct tags produce distinct payloads, so block-level mixups show
/// up as content mismatches rather than silent passes.
pub fn patterned(len: usize, tag: u8) -> Bytes {
    // Truncation is intentional: the pattern cycles through byte values.
    #[allow(clippy::cast_possible_truncation)]
    let data: Vec<u8> = (0..len).map(|i| tag ^ ((i % 251) as u8)).collect();
    Bytes::from(data)
}

/// One full 4 MiB block of patterned data.
pub fn block_sized(tag: u8) -> Bytes {
    // Truncation is fine: BLOCK_SIZE is 4 MiB.
    #[allow(clippy::cast_possible_truncation)]
    patterned(BLOCK_SIZE as usize, tag)
}

/// Random payload of the given length.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    Bytes::from(data)
}

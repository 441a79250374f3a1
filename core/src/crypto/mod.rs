//! Cryptographic primitives for the Wireprobe protocol clients
//!
//! This module provides the hash, MAC and key-derivation functions that the
//! password-based authentication exchanges are built from. All of them are
//! pure functions with no state; they produce byte-identical output to the
//! reference algorithms (RFC 1321, RFC 2104 over FIPS 180-4, RFC 8018).

use constant_time_eq::constant_time_eq;
use hmac::digest::generic_array::GenericArray;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a [`hash128`] digest
pub const HASH128_LEN: usize = 16;

/// Length in bytes of a SHA-256 digest and of an HMAC-SHA-256 tag
pub const SHA256_LEN: usize = 32;

/// SHA-256 input block size, which is also the HMAC key block size
const SHA256_BLOCK_LEN: usize = 64;

/// Compute the 128-bit block hash (MD5, RFC 1321) of `data`
pub fn hash128(data: &[u8]) -> [u8; HASH128_LEN] {
    md5::compute(data).0
}

/// Compute the 128-bit block hash of `data` as 32 lowercase hex characters
pub fn hash128_hex(data: &[u8]) -> String {
    hex::encode(hash128(data))
}

/// Compute the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    let mut output = [0u8; SHA256_LEN];
    output.copy_from_slice(&Sha256::digest(data));
    output
}

/// Compute HMAC-SHA-256 of `data` under `key`
///
/// Any key length is valid, including the empty key: keys longer than the
/// block size are hashed first and shorter keys are zero-padded, exactly as
/// RFC 2104 prescribes.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; SHA256_LEN] {
    let mut mac = keyed_mac(key);
    mac.update(data);

    let mut output = [0u8; SHA256_LEN];
    output.copy_from_slice(&mac.finalize().into_bytes());
    output
}

/// Derive `output_len` bytes from `password` and `salt` with PBKDF2-HMAC-SHA-256
///
/// An iteration count of zero is treated like one, since the first block
/// function round is always computed.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32, output_len: usize) -> Vec<u8> {
    let mut output = vec![0u8; output_len];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
    output
}

/// XOR two equally sized byte arrays
pub fn xor_bytes<const N: usize>(a: &[u8; N], b: &[u8; N]) -> [u8; N] {
    let mut output = [0u8; N];
    for (out, (x, y)) in output.iter_mut().zip(a.iter().zip(b.iter())) {
        *out = x ^ y;
    }
    output
}

/// Compare two byte strings in constant time
///
/// Slices of different lengths never match.
pub fn verify_digest(expected: &[u8], actual: &[u8]) -> bool {
    constant_time_eq(expected, actual)
}

/// Key an HMAC-SHA-256 instance from a full block-sized key
fn keyed_mac(key: &[u8]) -> HmacSha256 {
    let mut block = [0u8; SHA256_BLOCK_LEN];
    if key.len() > SHA256_BLOCK_LEN {
        block[..SHA256_LEN].copy_from_slice(&sha256(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    <HmacSha256 as KeyInit>::new(GenericArray::from_slice(&block))
}

// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Cryptographic helpers
//
// - random token strings (OS randomness, URL-safe base64 without padding)
// - captcha answers from an unambiguous alphabet
// - keyed password hashes (HMAC-SHA256 with a purpose-specific salt)
// - digests for the referrer success hash
// - constant-time string comparison

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::domain::token::HashAlgorithm;

type HmacSha256 = Hmac<Sha256>;

// no 0/o, 1/l/i
const CAPTCHA_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Random token string of `size` bytes of entropy. With `size` a multiple of
/// 3 the encoding has no padding and exactly `size * 4 / 3` characters.
pub fn random_token(size: usize) -> String {
    let mut bytes = vec![0u8; size];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Random captcha answer of `len` characters.
pub fn random_captcha(len: usize) -> String {
    (0..len)
        .map(|_| {
            let index = OsRng.next_u32() as usize % CAPTCHA_ALPHABET.len();
            char::from(CAPTCHA_ALPHABET[index])
        })
        .collect()
}

/// Keyed hash of `value` for the given purpose (`"pw-access"`,
/// `"travel-trigger"`, ...). Different purposes never collide for the same
/// input.
pub fn salted_hash(secret_key: &str, purpose: &str, value: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(purpose.as_bytes());
    mac.update(&[0]);
    mac.update(value.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn digest_hex(algorithm: HashAlgorithm, data: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

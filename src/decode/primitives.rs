//! Reversible transform primitives composed into provider pipelines.
//!
//! Every primitive is a plain function over text or bytes so pipelines stay
//! declarative and each transform is testable in isolation. Parameters
//! (keys, tables, shift amounts) are established offline and fixed in the
//! registry; nothing here guesses at runtime.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::DecodeFailure;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The standard base64 alphabet, used as the target of substitution tables.
pub const STANDARD_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Rotate each ASCII letter backward by `shift` positions, wrapping within
/// its case range. Non-letter characters pass through unchanged.
///
/// The backward convention matches the provider scripts, which store URLs
/// shifted forward: `shift_cipher("eqqmp://", -3) == "https://"`, and
/// `shift_cipher(shift_cipher(x, n), -n) == x` for any `x`.
pub fn shift_cipher(s: &str, shift: i8) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' => rotate(c, b'a', shift),
            'A'..='Z' => rotate(c, b'A', shift),
            _ => c,
        })
        .collect()
}

fn rotate(c: char, base: u8, shift: i8) -> char {
    let idx = (c as u8 - base) as i32;
    let rotated = (idx - shift as i32).rem_euclid(26) as u8;
    (base + rotated) as char
}

/// ROT13, the self-inverse half-alphabet rotation.
pub fn rot13(s: &str) -> String {
    shift_cipher(s, 13)
}

/// Repeating-key XOR. Self-inverse for a fixed key.
pub fn xor_chain(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/// Subtract `n` from every byte, wrapping. Inverse of the add-`n`
/// obfuscation several providers layer under base64.
pub fn subtract_bytes(data: &[u8], n: u8) -> Vec<u8> {
    data.iter().map(|b| b.wrapping_sub(n)).collect()
}

/// Reverse the character order of `s`.
pub fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

/// Keep every `n`-th character starting from the first, dropping the
/// interleaved filler the provider mixes in.
pub fn keep_every_nth(s: &str, n: usize) -> String {
    s.chars()
        .enumerate()
        .filter(|(i, _)| i % n == 0)
        .map(|(_, c)| c)
        .collect()
}

/// Drop `front` characters from the start and `back` from the end.
pub fn trim_ends(s: &str, front: usize, back: usize) -> Result<String, DecodeFailure> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < front + back {
        return Err(DecodeFailure::new(format!(
            "payload too short to trim {front}+{back} characters"
        )));
    }
    Ok(chars[front..chars.len() - back].iter().collect())
}

/// Reverse the order of `delimiter`-separated segments, dropping the
/// delimiters. Undoes the segment shuffling some providers apply to
/// base64 payloads.
pub fn segment_reverse(s: &str, delimiter: char) -> String {
    let mut out: String = s
        .split(delimiter)
        .flat_map(|segment| segment.chars().rev())
        .collect();
    out = out.chars().rev().collect();
    out
}

/// Decode a string of hexadecimal byte pairs.
pub fn hex_pairs(s: &str) -> Result<Vec<u8>, DecodeFailure> {
    hex::decode(s.trim()).map_err(|e| DecodeFailure::new(format!("invalid hex payload: {e}")))
}

/// Base64 decode, tolerating missing padding and embedded whitespace.
/// With `url_safe`, `-` and `_` are mapped to the standard alphabet first.
pub fn base64_decode(s: &str, url_safe: bool) -> Result<Vec<u8>, DecodeFailure> {
    let mut cleaned = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_whitespace() {
            continue;
        }
        cleaned.push(match (c, url_safe) {
            ('-', true) => '+',
            ('_', true) => '/',
            _ => c,
        });
    }
    match cleaned.len() % 4 {
        2 => cleaned.push_str("=="),
        3 => cleaned.push('='),
        _ => {}
    }
    BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| DecodeFailure::new(format!("invalid base64 payload: {e}")))
}

/// Map a payload written in a shuffled base64 alphabet back to the
/// standard alphabet, then decode it.
///
/// `table` is the 64-character permutation the provider uses: its `i`-th
/// character stands for the `i`-th character of [`STANDARD_ALPHABET`].
pub fn substitution_alphabet_base64(s: &str, table: &str) -> Result<Vec<u8>, DecodeFailure> {
    let standard: Vec<char> = STANDARD_ALPHABET.chars().collect();
    let mut mapped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '=' || c.is_whitespace() {
            mapped.push(c);
            continue;
        }
        match table.chars().position(|t| t == c) {
            Some(idx) => mapped.push(standard[idx]),
            None => {
                return Err(DecodeFailure::new(format!(
                    "character {c:?} not in substitution table"
                )))
            }
        }
    }
    base64_decode(&mapped, false)
}

/// AES-CBC decrypt with a fixed key and IV, PKCS#7 padding.
///
/// Key length selects AES-128 or AES-256. Invalid padding means the
/// provider rotated its key; that is surfaced as a failure, never retried
/// with guessed parameters.
pub fn aes_cbc_decrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, DecodeFailure> {
    match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| DecodeFailure::new(format!("bad AES-128 key/iv: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| DecodeFailure::new("AES-CBC padding invalid (key rotated?)")),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| DecodeFailure::new(format!("bad AES-256 key/iv: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| DecodeFailure::new("AES-CBC padding invalid (key rotated?)")),
        n => Err(DecodeFailure::new(format!(
            "unsupported AES key length: {n}"
        ))),
    }
}

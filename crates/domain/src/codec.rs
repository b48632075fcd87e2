//! Decoder for the packed 256-bit transfer identifier emitted by the bridge
//! contract.
//!
//! Bit layout (bit 0 is the least significant bit of the big-endian word):
//!
//! ```text
//!   [128, 192)  amount        64-bit magnitude at the source chain precision
//!   [192, 200)  token index   8-bit asset tag
//!   [208, 248)  created time  40-bit unix timestamp (seconds)
//! ```
//!
//! Every field is extracted from an arbitrary-precision integer and masked
//! explicitly after the shift, so no intermediate is truncated implicitly.

use num_bigint::BigUint;
use thiserror::Error;

/// Precision (decimal digits) every amount is normalised to before legs are
/// compared.
pub const CANONICAL_DECIMALS: u8 = 6;

const AMOUNT_SHIFT: u32 = 128;
const TOKEN_INDEX_SHIFT: u32 = 192;
const CREATED_TIME_SHIFT: u32 = 208;

const AMOUNT_MASK: u64 = u64::MAX;
const TOKEN_INDEX_MASK: u64 = 0xff;
const CREATED_TIME_MASK: u64 = 0xff_ffff_ffff;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("malformed transfer identifier: {0}")]
    MalformedIdentifier(String),
}

/// The three fields carried by an identifier, before amount normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawIdentifier {
    pub token_index: u8,
    pub raw_amount: u64,
    pub created_time: u64,
}

/// A decoded identifier whose amount is expressed at [`CANONICAL_DECIMALS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub token_index: u8,
    pub amount: u64,
    pub created_time: u64,
}

/// Splits a big-endian identifier word into its raw fields.
pub fn decode_identifier(identifier: &[u8; 32]) -> RawIdentifier {
    let value = BigUint::from_bytes_be(identifier);
    RawIdentifier {
        token_index: extract_field(&value, TOKEN_INDEX_SHIFT, TOKEN_INDEX_MASK) as u8,
        raw_amount: extract_field(&value, AMOUNT_SHIFT, AMOUNT_MASK),
        created_time: extract_field(&value, CREATED_TIME_SHIFT, CREATED_TIME_MASK),
    }
}

fn extract_field(value: &BigUint, shift: u32, mask: u64) -> u64 {
    let field = (value >> shift) & BigUint::from(mask);
    // Masked to at most 64 bits, so a single digit (or none for zero).
    field.iter_u64_digits().next().unwrap_or(0)
}

/// Rescales a raw amount by the distance between `decimals` and the canonical
/// precision. The division truncates: remainders below canonical precision
/// are discarded, never rounded.
pub fn rescale_amount(raw_amount: u64, decimals: u8) -> u64 {
    let distance = u32::from(decimals.abs_diff(CANONICAL_DECIMALS));
    match 10u128.checked_pow(distance) {
        Some(divisor) => (u128::from(raw_amount) / divisor) as u64,
        None => 0,
    }
}

/// Decodes an identifier and normalises its amount.
pub fn decode_transfer(identifier: &[u8; 32], decimals: u8) -> Result<DecodedTransfer, DecodeError> {
    let raw = decode_identifier(identifier);
    if raw.raw_amount == 0 {
        return Err(DecodeError::InvalidAmount);
    }

    Ok(DecodedTransfer {
        token_index: raw.token_index,
        amount: rescale_amount(raw.raw_amount, decimals),
        created_time: raw.created_time,
    })
}

/// Decodes an identifier only when it belongs to `expected_index`.
///
/// `Ok(None)` means the identifier concerns another asset and should be
/// ignored; the token index is checked before the amount, so a foreign
/// identifier never surfaces as a decode error.
pub fn decode_for_token(
    identifier: &[u8; 32],
    expected_index: u8,
    decimals: u8,
) -> Result<Option<DecodedTransfer>, DecodeError> {
    if decode_identifier(identifier).token_index != expected_index {
        return Ok(None);
    }
    decode_transfer(identifier, decimals).map(Some)
}

/// Packs the three fields back into an identifier word. Bits outside the
/// three fields are left at zero.
pub fn encode_identifier(token_index: u8, raw_amount: u64, created_time: u64) -> [u8; 32] {
    let value = (BigUint::from(created_time & CREATED_TIME_MASK) << CREATED_TIME_SHIFT)
        | (BigUint::from(token_index) << TOKEN_INDEX_SHIFT)
        | (BigUint::from(raw_amount) << AMOUNT_SHIFT);

    let bytes = value.to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

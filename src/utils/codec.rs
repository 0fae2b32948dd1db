use alloy_primitives::{B256, U256, hex};

use crate::models::errors::DataError;
use crate::models::logs::EncodedArg;

/// Limb base of the coefficient, 10^14.
pub const LIMB_BASE: u64 = 100_000_000_000_000;
const LIMB_DIGITS: u32 = 14;
/// Largest decimal exponent of a 256-bit value (2^256 - 1 has 78 digits).
const MAX_EXPONENT: u32 = 77;

/// Encode a 32-byte word, read as an unsigned big-endian integer.
///
/// Limbs sit on multiples of 14 decimal places counted from the units, so the
/// leading limb carries `e % 14 + 1` digits and the rest carry 14 each.
pub fn encode_word(word: &B256) -> EncodedArg {
    let base = U256::from(LIMB_BASE);
    let mut value = U256::from_be_bytes(word.0);
    if value.is_zero() {
        return EncodedArg { c: vec![0], e: 0 };
    }

    // Least significant first
    let mut limbs = Vec::with_capacity(6);
    while !value.is_zero() {
        let (quotient, remainder) = value.div_rem(base);
        limbs.push(remainder.as_limbs()[0]);
        value = quotient;
    }

    let whole_limbs = limbs.len() as u32 - 1;
    let lead = limbs[limbs.len() - 1];
    let e = lead.ilog10() + whole_limbs * LIMB_DIGITS;

    let trailing_zeros = limbs.iter().take_while(|limb| **limb == 0).count();
    let c = limbs[trailing_zeros..].iter().rev().copied().collect();
    EncodedArg { c, e }
}

/// Reverse of [`encode_word`]. Only the normalized form it produces is accepted.
pub fn decode_word(arg: &EncodedArg) -> Result<B256, DataError> {
    let invalid = |reason: String| DataError::InvalidEncoding { reason };

    let (first, rest) = arg
        .c
        .split_first()
        .ok_or_else(|| invalid("empty coefficient".to_string()))?;
    if let Some(limb) = arg.c.iter().find(|limb| **limb >= LIMB_BASE) {
        return Err(invalid(format!("limb {limb} out of range")));
    }
    if *first == 0 {
        if rest.is_empty() && arg.e == 0 {
            return Ok(B256::ZERO);
        }
        return Err(invalid("leading limb is zero".to_string()));
    }
    if rest.last() == Some(&0) {
        return Err(invalid("trailing zero limb".to_string()));
    }

    let e = arg.e;
    if e > MAX_EXPONENT {
        return Err(invalid(format!("exponent {e} exceeds 32 bytes")));
    }
    if first.ilog10() != e % LIMB_DIGITS {
        return Err(invalid(format!(
            "leading limb {first} does not match exponent {e}"
        )));
    }
    let total_limbs = (e / LIMB_DIGITS + 1) as usize;
    if arg.c.len() > total_limbs {
        return Err(invalid(format!(
            "{} limbs exceed exponent {e}",
            arg.c.len()
        )));
    }

    let base = U256::from(LIMB_BASE);
    let overflow = || invalid("value does not fit in 32 bytes".to_string());
    let mut value = U256::ZERO;
    for limb in arg.c.iter().copied() {
        value = value
            .checked_mul(base)
            .and_then(|v| v.checked_add(U256::from(limb)))
            .ok_or_else(overflow)?;
    }
    for _ in arg.c.len()..total_limbs {
        value = value.checked_mul(base).ok_or_else(overflow)?;
    }
    Ok(B256::from(value.to_be_bytes::<32>()))
}

/// Decode to the `0x`-prefixed, zero-padded 64-character hex form.
pub fn decode_hex(arg: &EncodedArg) -> Result<String, DataError> {
    decode_word(arg).map(hex::encode_prefixed)
}

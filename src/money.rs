//! Fixed-point money display.
//!
//! Amounts travel and are compared as integers scaled by 10^6. Conversion to
//! a decimal string happens only here, on the way to the screen.

use bigdecimal::BigDecimal;

pub const SCALE_DIGITS: u32 = 6;
pub const SCALING_FACTOR: i64 = 1_000_000;

const FIAT_FRACTION_DIGITS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountKind {
    /// Exactly two fraction digits.
    Fiat,
    /// Up to six fraction digits, trailing zeros trimmed.
    OnChain,
}

/// Scaled integer to float. Display-only; never feed the result back into
/// arithmetic.
pub fn scaled_to_float(amount: i64) -> f64 {
    amount as f64 / SCALING_FACTOR as f64
}

pub fn to_human_friendly(amount: i64, kind: AmountKind) -> String {
    let value = BigDecimal::new(amount.into(), SCALE_DIGITS as i64);

    let rounded = match kind {
        // `round` goes half away from zero on the first dropped digit.
        AmountKind::Fiat => value
            .round(FIAT_FRACTION_DIGITS as i64)
            .with_scale(FIAT_FRACTION_DIGITS as i64),
        AmountKind::OnChain => {
            let trimmed = value.normalized();
            if trimmed.as_bigint_and_exponent().1 < 0 {
                trimmed.with_scale(0)
            } else {
                trimmed
            }
        }
    };

    let text = rounded.to_string();
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    match unsigned.split_once('.') {
        Some((whole, fraction)) => format!("{sign}{}.{fraction}", group_thousands(whole)),
        None => format!("{sign}{}", group_thousands(unsigned)),
    }
}

pub fn fiat_to_human_friendly(amount: i64) -> String {
    to_human_friendly(amount, AmountKind::Fiat)
}

pub fn onchain_to_human_friendly(amount: i64) -> String {
    to_human_friendly(amount, AmountKind::OnChain)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

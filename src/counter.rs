//! Normalisation of human-readable view counters.
//!
//! Search result pages render counters in whatever locale the session got:
//! `1,234`, `1.2M`, `3万`, `2億`. [`parse_count`] turns any of those into an
//! exact integer and is total: every input, including garbage, yields a value.

use once_cell::sync::Lazy;
use regex::Regex;

/// Unit symbols in match priority order. When a string contains several
/// symbols the earliest entry here wins.
const UNITS: &[(&str, u64)] = &[
    ("K", 1_000),
    ("k", 1_000),
    ("千", 1_000),
    ("M", 1_000_000),
    ("m", 1_000_000),
    ("万", 10_000),
    ("B", 1_000_000_000),
    ("b", 1_000_000_000),
    ("億", 100_000_000),
];

const GROUPING_SEPARATORS: &[char] = &[',', '，'];

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]*\.?[0-9]+").expect("number pattern is valid"));

/// Parse a noisy counter string into a canonical non-negative integer.
///
/// Returns 0 for `None`, empty, or text without any digits.
pub fn parse_count(text: Option<&str>) -> u64 {
    let Some(text) = text else {
        return 0;
    };

    let cleaned: String = text
        .chars()
        .filter(|c| !GROUPING_SEPARATORS.contains(c))
        .collect();

    let Some(number) = NUMBER.find(&cleaned) else {
        return 0;
    };

    let factor = UNITS
        .iter()
        .find(|(symbol, _)| cleaned.contains(symbol))
        .map(|(_, factor)| *factor)
        .unwrap_or(1);

    scale_decimal(number.as_str(), factor)
}

/// Multiply a plain decimal literal by `factor` and truncate, using integer
/// arithmetic so `2.3万` is 23000 rather than 22999.
fn scale_decimal(literal: &str, factor: u64) -> u64 {
    let (whole, fraction) = literal.split_once('.').unwrap_or((literal, ""));

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        match whole.parse() {
            Ok(value) => value,
            // Longer than u128; nothing real is that big.
            Err(_) => return u64::MAX,
        }
    };

    let factor = factor as u128;
    let mut total = whole.saturating_mul(factor);

    // Digits past 38 cannot move the truncated result for any factor we use.
    let fraction = &fraction[..fraction.len().min(38)];
    if !fraction.is_empty() {
        if let Ok(numerator) = fraction.parse::<u128>() {
            let denominator = 10u128.pow(fraction.len() as u32);
            let scaled = numerator
                .checked_mul(factor)
                .map(|n| n / denominator)
                .unwrap_or_else(|| numerator / (denominator / factor.max(1)).max(1));
            total = total.saturating_add(scaled);
        }
    }

    u64::try_from(total).unwrap_or(u64::MAX)
}

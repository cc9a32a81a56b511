//! Integer-cents currency helpers.
//!
//! Prices are stored as integer smallest-currency-units everywhere in the
//! stack; formatting only happens at display boundaries and must be lossless
//! under [`parse_cents`].

use num_format::{Locale, ToFormattedString};

/// Format cents as a display string, e.g. `129999` -> `"$1,299.99"`.
///
/// Negative amounts render with a leading minus: `"-$0.50"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let dollars = (abs / 100).to_formatted_string(&Locale::en);
    format!("{sign}${dollars}.{:02}", abs % 100)
}

/// Parse a string produced by [`format_cents`] (or plain `"1299.99"` /
/// `"1299"` input) back to cents.
pub fn parse_cents(s: &str) -> Result<i64, String> {
    let trimmed = s.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let rest = rest.strip_prefix('$').unwrap_or(rest).replace(',', "");
    if rest.is_empty() {
        return Err(format!("empty currency string: '{s}'"));
    }

    let (whole, frac) = match rest.split_once('.') {
        Some((w, f)) => (w, f),
        None => (rest.as_str(), ""),
    };
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid fractional part in '{s}'"));
    }
    let whole: i64 = whole
        .parse()
        .map_err(|e| format!("invalid currency '{s}': {e}"))?;

    // "1299.9" means 90 cents, not 9
    let frac_cents: i64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<2}");
        padded.parse().map_err(|e| format!("invalid currency '{s}': {e}"))?
    };

    let cents = whole * 100 + frac_cents;
    Ok(if negative { -cents } else { cents })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_groups_thousands() {
        assert_eq!(format_cents(129_999), "$1,299.99");
        assert_eq!(format_cents(5), "$0.05");
        assert_eq!(format_cents(-50), "-$0.50");
    }

    #[test]
    fn parse_inverts_format() {
        for cents in [0, 1, 99, 100, 129_999, 84_999_00, -2_450] {
            let formatted = format_cents(cents);
            assert_eq!(parse_cents(&formatted).unwrap(), cents, "{formatted}");
        }
    }

    #[test]
    fn parse_accepts_bare_numbers() {
        assert_eq!(parse_cents("1299.99").unwrap(), 129_999);
        assert_eq!(parse_cents("1299.9").unwrap(), 129_990);
        assert_eq!(parse_cents("1299").unwrap(), 129_900);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_cents("").is_err());
        assert!(parse_cents("$12.999").is_err());
        assert!(parse_cents("abc").is_err());
    }
}

//! Conversion between user-entered amounts and integer minor units

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::result::{Error, Result};

const CENTS_PER_UNIT: i64 = 100;

/// Parse a decimal amount such as `25`, `25.5` or `-0.05` into cents.
///
/// More than two fractional digits is rejected rather than rounded.
pub fn parse_amount(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    let value: Decimal = trimmed
        .parse()
        .map_err(|_| Error::validation(format!("invalid amount: {:?}", trimmed)))?;

    let value = value.normalize();
    if value.scale() > 2 {
        return Err(Error::validation(format!(
            "amount {} has more than two decimal places",
            trimmed
        )));
    }

    value
        .checked_mul(Decimal::from(CENTS_PER_UNIT))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| Error::validation(format!("amount {} is out of range", trimmed)))
}

/// Format cents as a fixed two-decimal amount
pub fn format_cents(cents: i64) -> String {
    Decimal::new(cents, 2).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional_amounts() {
        assert_eq!(parse_amount("25").unwrap(), 2500);
        assert_eq!(parse_amount("25.5").unwrap(), 2550);
        assert_eq!(parse_amount(" 0.05 ").unwrap(), 5);
        assert_eq!(parse_amount("-12.34").unwrap(), -1234);
    }

    #[test]
    fn test_trailing_zeros_are_not_extra_precision() {
        assert_eq!(parse_amount("10.500").unwrap(), 1050);
    }

    #[test]
    fn test_rejects_sub_cent_precision() {
        assert!(matches!(parse_amount("1.005"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_huge_amount_is_out_of_range() {
        assert!(matches!(
            parse_amount("79228162514264337593543950335"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_amount("92233720368547758.08"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_amount("ten").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(250000), "2500.00");
        assert_eq!(format_cents(7), "0.07");
        assert_eq!(format_cents(-1234), "-12.34");
    }
}

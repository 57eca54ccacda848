use thiserror::Error;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// 1 unit = 100 cents, so 50.00 = 5000 cents.
pub type Cents = i64;

/// Format cents as a human-readable amount.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
/// More than two fractional digits is an error, never a rounding.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (units_str, decimal_str) = match digits.split_once('.') {
        Some((units, decimals)) => (units, decimals),
        None => (digits, ""),
    };

    if units_str.is_empty() && decimal_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }
    if !units_str.chars().all(|c| c.is_ascii_digit())
        || !decimal_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseCentsError::InvalidFormat);
    }
    if decimal_str.len() > 2 {
        return Err(ParseCentsError::TooManyDecimals);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseCentsError::Overflow)?
    };

    // "5" after the point means 50 cents
    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => decimal_str.parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)? * 10,
        _ => decimal_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(decimal_cents))
        .ok_or(ParseCentsError::Overflow)?;

    Ok(if negative { -cents } else { cents })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    #[error("invalid money format")]
    InvalidFormat,

    #[error("amounts support at most two decimal places")]
    TooManyDecimals,

    #[error("amount is too large")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(5000), "50.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(1), "0.01");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-5000), "-50.00");
        assert_eq!(format_cents(-1), "-0.01");
        assert_eq!(format_cents(i64::MIN), "-92233720368547758.08");
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("50.00"), Ok(5000));
        assert_eq!(parse_cents("50"), Ok(5000));
        assert_eq!(parse_cents("12.34"), Ok(1234));
        assert_eq!(parse_cents("12.5"), Ok(1250));
        assert_eq!(parse_cents("0.01"), Ok(1));
        assert_eq!(parse_cents(".50"), Ok(50));
        assert_eq!(parse_cents("7."), Ok(700));
        assert_eq!(parse_cents(" 20 "), Ok(2000));
        assert_eq!(parse_cents("-50.00"), Ok(-5000));
    }

    #[test]
    fn test_parse_cents_rejects_extra_precision() {
        assert_eq!(parse_cents("100.999"), Err(ParseCentsError::TooManyDecimals));
        assert_eq!(parse_cents("0.001"), Err(ParseCentsError::TooManyDecimals));
    }

    #[test]
    fn test_parse_cents_invalid() {
        assert_eq!(parse_cents("abc"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("12.34.56"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents(""), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("."), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("--5"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("+5"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("1e3"), Err(ParseCentsError::InvalidFormat));
    }

    #[test]
    fn test_parse_cents_overflow() {
        assert_eq!(
            parse_cents("92233720368547758.08"),
            Err(ParseCentsError::Overflow)
        );
        assert_eq!(
            parse_cents("99999999999999999999999"),
            Err(ParseCentsError::Overflow)
        );
        assert_eq!(parse_cents("92233720368547758.07"), Ok(i64::MAX));
    }
}

use crate::error::RangeFault;

/// Wildcard token meaning "every value the inventory knows about".
pub const WILDCARD: &str = "*";

/// A spec string classified once, up front.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSpec<'a> {
    /// Blank input: the field is simply not randomized.
    Empty,
    Range(RangeSpec),
    List(ListSpec<'a>),
    /// Range-shaped input whose bounds cannot describe a lattice.
    Invalid(RangeFault),
}

/// `start,stop,step` numeric lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// Digits after the decimal point in the step token as typed.
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSpec<'a> {
    All,
    Tokens(Vec<&'a str>),
}

impl RangeSpec {
    /// Highest lattice index `n` such that `start + n * step` is drawn.
    ///
    /// Truncates toward zero, so a quotient that lands just under a whole
    /// number loses the top value.
    pub fn max_index(&self) -> u64 {
        ((self.stop - self.start) / self.step).trunc() as u64
    }

    pub fn value_at(&self, index: u64) -> f64 {
        index as f64 * self.step + self.start
    }
}

/// Parses a raw spec string.
///
/// Grammar: exactly three comma separated tokens with a numeric first token
/// form a range (unless `accepts_range` is false); everything else is a
/// list of literal choices, with a lone `*` meaning all known values.
pub fn parse_spec(raw: &str, accepts_range: bool) -> ParsedSpec<'_> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedSpec::Empty;
    }

    let tokens = split_tokens(trimmed);

    if accepts_range && tokens.len() == 3 && is_numeric_token(tokens[0]) {
        return match parse_range(&tokens) {
            Ok(range) => ParsedSpec::Range(range),
            Err(fault) => ParsedSpec::Invalid(fault),
        };
    }

    if trimmed == WILDCARD {
        return ParsedSpec::List(ListSpec::All);
    }

    ParsedSpec::List(ListSpec::Tokens(tokens))
}

/// Splits on commas and trims each token. Empty tokens are kept so that
/// `"1,,2"` still counts three positions.
pub fn split_tokens(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).collect()
}

/// Accepts plain digit runs and anything `f64` parsing accepts (`7.5`,
/// `-1`, `1e3`).
pub fn is_numeric_token(token: &str) -> bool {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    token.parse::<f64>().is_ok()
}

/// Number of characters after the last `.` in a numeric token, or 0.
pub fn declared_decimals(token: &str) -> u32 {
    token
        .rfind('.')
        .map(|pos| (token.len() - pos - 1) as u32)
        .unwrap_or(0)
}

/// Rounds half to even at `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(15) as i32);
    (value * factor).round_ties_even() / factor
}

fn parse_range(tokens: &[&str]) -> Result<RangeSpec, RangeFault> {
    let mut bounds = [0f64; 3];
    for (slot, token) in bounds.iter_mut().zip(tokens) {
        *slot = token.parse::<f64>().map_err(|_| RangeFault::NonNumericBound)?;
    }
    let [start, stop, step] = bounds;

    if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
        return Err(RangeFault::NonFinite);
    }
    if step <= 0.0 {
        return Err(RangeFault::NonPositiveStep);
    }
    if stop < start {
        return Err(RangeFault::Inverted);
    }

    Ok(RangeSpec {
        start,
        stop,
        step,
        decimals: declared_decimals(tokens[2]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(parse_spec("", true), ParsedSpec::Empty);
        assert_eq!(parse_spec("   \t", true), ParsedSpec::Empty);
    }

    #[test]
    fn test_three_numeric_tokens_form_range() {
        let parsed = parse_spec(" 5, 15 , 0.5 ", true);
        assert_eq!(
            parsed,
            ParsedSpec::Range(RangeSpec {
                start: 5.0,
                stop: 15.0,
                step: 0.5,
                decimals: 1,
            })
        );
    }

    #[test]
    fn test_range_exempt_field_gets_list() {
        assert_eq!(
            parse_spec("1,100,1", false),
            ParsedSpec::List(ListSpec::Tokens(vec!["1", "100", "1"]))
        );
    }

    #[test]
    fn test_two_or_four_tokens_are_lists() {
        assert_eq!(
            parse_spec("7,8", true),
            ParsedSpec::List(ListSpec::Tokens(vec!["7", "8"]))
        );
        assert_eq!(
            parse_spec("1,2,3,4", true),
            ParsedSpec::List(ListSpec::Tokens(vec!["1", "2", "3", "4"]))
        );
    }

    #[test]
    fn test_non_numeric_first_token_is_list() {
        assert_eq!(
            parse_spec("euler a, euler, dpm++", true),
            ParsedSpec::List(ListSpec::Tokens(vec!["euler a", "euler", "dpm++"]))
        );
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(parse_spec(" * ", true), ParsedSpec::List(ListSpec::All));
    }

    #[test]
    fn test_bad_bounds_are_invalid() {
        assert_eq!(
            parse_spec("1,abc,1", true),
            ParsedSpec::Invalid(RangeFault::NonNumericBound)
        );
        assert_eq!(
            parse_spec("1,10,0", true),
            ParsedSpec::Invalid(RangeFault::NonPositiveStep)
        );
        assert_eq!(
            parse_spec("10,1,1", true),
            ParsedSpec::Invalid(RangeFault::Inverted)
        );
        assert_eq!(
            parse_spec("1,inf,1", true),
            ParsedSpec::Invalid(RangeFault::NonFinite)
        );
    }

    #[test]
    fn test_declared_decimals() {
        assert_eq!(declared_decimals("1"), 0);
        assert_eq!(declared_decimals("0.5"), 1);
        assert_eq!(declared_decimals("0.05"), 2);
        assert_eq!(declared_decimals("0.050"), 3);
        assert_eq!(declared_decimals("1e-2"), 0);
    }

    #[test]
    fn test_max_index_truncates() {
        let range = RangeSpec {
            start: 0.5,
            stop: 0.8,
            step: 0.05,
            decimals: 2,
        };
        assert!(range.max_index() == 5 || range.max_index() == 6);
        assert!(round_to(range.value_at(range.max_index()), 2) <= 0.8);
    }

    #[test]
    fn test_round_to_ties_go_to_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(0.55, 2), 0.55);
    }

    #[test]
    fn test_is_numeric_token() {
        assert!(is_numeric_token("20"));
        assert!(is_numeric_token("-1.5"));
        assert!(is_numeric_token("1e3"));
        assert!(!is_numeric_token("euler"));
        assert!(!is_numeric_token(""));
    }
}

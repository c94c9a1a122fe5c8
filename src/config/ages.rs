use crate::core::ConfigError;

/// Last age produced by an open range such as `"67-"`.
pub const OPEN_RANGE_END: u32 = 120;

/// Expands a comma-separated age list of `N`, `N-M` and `N-` tokens, in the order given.
///
/// Ages above [`OPEN_RANGE_END`] are rejected.
pub fn parse_ages(spec: &str) -> Result<Vec<u32>, ConfigError> {
    let mut ages = Vec::new();
    for raw in spec.split(',') {
        let token = raw.trim();
        let bad = || ConfigError::AgeSpec {
            spec: spec.to_string(),
            token: token.to_string(),
        };

        let (start, end) = match token.split_once('-') {
            None => {
                let age = parse_number(token).ok_or_else(bad)?;
                (age, age)
            }
            Some((start, "")) => (parse_number(start).ok_or_else(bad)?, OPEN_RANGE_END),
            Some((start, end)) => (
                parse_number(start).ok_or_else(bad)?,
                parse_number(end).ok_or_else(bad)?,
            ),
        };
        if end < start || end > OPEN_RANGE_END {
            return Err(bad());
        }
        ages.extend(start..=end);
    }
    Ok(ages)
}

fn parse_number(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

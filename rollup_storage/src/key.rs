//! Bucket key construction.
//!
//! `metric_key:tag_1:...:tag_n:period_start:timestep_code`
//!
//! Keys are not escaped. Tag values must not contain [`SEP`]; that is checked
//! where points enter the system, not here.

use std::fmt;

use crate::timestep::UnixTime;

/// Key segment separator.
pub const SEP: char = ':';

/// Identity of one bucket hash in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey<'a> {
    /// Storage prefix of the metric.
    pub metric_key: &'a str,
    /// Tag values in the metric's tag order.
    pub tag_values: &'a [String],
    /// Start of the bucket's period.
    pub period_start: UnixTime,
    /// Short code of the timestep.
    pub timestep_code: &'a str,
}

impl fmt::Display for BucketKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The joined tag segment is always written, even when empty.
        write!(f, "{}{SEP}", self.metric_key)?;
        for (i, value) in self.tag_values.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEP}")?;
            }
            f.write_str(value)?;
        }
        write!(f, "{SEP}{}{SEP}{}", self.period_start, self.timestep_code)
    }
}

/// Render a bucket key string.
pub fn build_key(
    metric_key: &str,
    tag_values: &[String],
    period_start: UnixTime,
    timestep_code: &str,
) -> String {
    BucketKey {
        metric_key,
        tag_values,
        period_start,
        timestep_code,
    }
    .to_string()
}

/// Hash field name for a sub-step index.
pub fn field_name(sub_step: u32) -> String {
    sub_step.to_string()
}

/// Parse a hash field name back into a sub-step index.
pub fn parse_field(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn key_layout() {
        let key = build_key("impression", &tags(&["1234"]), 1_427_346_000, "h");
        assert_eq!(key, "impression:1234:1427346000:h");

        let key = build_key("impression", &tags(&["test", "test"]), 1_427_328_000, "d");
        assert_eq!(key, "impression:test:test:1427328000:d");
    }

    #[test]
    fn untagged_metric_keeps_empty_segment() {
        assert_eq!(build_key("hits", &[], 60, "h"), "hits::60:h");
    }

    #[test]
    fn fields_are_decimal() {
        assert_eq!(field_name(7), "7");
        assert_eq!(parse_field("59"), Some(59));
        assert_eq!(parse_field("-1"), None);
        assert_eq!(parse_field("+1"), None);
        assert_eq!(parse_field(""), None);
        assert_eq!(parse_field("x"), None);
    }
}

//! Source locations and their wire encoding.

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The location in a source file that an error occurred in.
///
/// If `end_column` differs from `begin_column` the location is a range,
/// otherwise it is a single point.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize, Default,
)]
pub struct SourceLocation {
    pub line_no: u32,
    pub begin_column: u32,
    pub end_column: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationParseError {
    #[error("expected `line|begin|end`, got `{0}`")]
    MalformedLocation(String),
    #[error("invalid location number: {0}")]
    InvalidNumber(#[from] ParseIntError),
}

impl SourceLocation {
    pub fn new(line_no: u32, begin_column: u32, end_column: u32) -> Self {
        Self {
            line_no,
            begin_column,
            end_column,
        }
    }

    /// A missing end column defaults to the begin column (single point).
    pub fn of(line_no: u32, begin_column: u32, end_column: Option<u32>) -> Self {
        Self::new(line_no, begin_column, end_column.unwrap_or(begin_column))
    }
}

/// Wire format is `line|begin|end`.
impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.line_no, self.begin_column, self.end_column)
    }
}

impl FromStr for SourceLocation {
    type Err = LocationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut points = s.split('|');
        let (Some(line), Some(begin), Some(end), None) =
            (points.next(), points.next(), points.next(), points.next())
        else {
            return Err(LocationParseError::MalformedLocation(s.to_owned()));
        };
        Ok(Self::new(line.parse()?, begin.parse()?, end.parse()?))
    }
}

/// Encodes a collection of locations, `,`-joined.
pub fn encode_locations<'a>(locations: impl IntoIterator<Item = &'a SourceLocation>) -> String {
    locations
        .into_iter()
        .map(|location| location.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_locations(encoded: &str) -> Result<Vec<SourceLocation>, LocationParseError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    encoded.split(',').map(SourceLocation::from_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_point_and_range() {
        // Single point: end == begin.
        let point = SourceLocation::of(12, 3, None);
        assert_eq!(point.to_string(), "12|3|3");
        assert_eq!("12|3|3".parse::<SourceLocation>().unwrap(), point);

        let range = SourceLocation::new(7, 1, 9);
        assert_eq!(range.to_string().parse::<SourceLocation>().unwrap(), range);
    }

    #[rstest::rstest]
    #[case("1|2")]
    #[case("1|2|3|4")]
    #[case("1|x|3")]
    #[case("")]
    fn rejects_malformed_strings(#[case] input: &str) {
        assert!(input.parse::<SourceLocation>().is_err());
    }

    #[test]
    fn list_encoding_roundtrips() {
        let titos = vec![SourceLocation::new(1, 2, 3), SourceLocation::new(4, 5, 5)];
        let encoded = encode_locations(&titos);
        assert_eq!(encoded, "1|2|3,4|5|5");
        assert_eq!(parse_locations(&encoded).unwrap(), titos);
        assert_eq!(parse_locations("").unwrap(), Vec::new());
    }
}

//! Line protocol
//!
//! Converts one delimited text line into a [`Reading`] and back. The layout
//! of a line is chosen from its field count, so the legacy and extended
//! formats go through the same code path.
//!
//! The parser is purely syntactic: a negative speed is a valid reading here.
//! Range checks belong to [`crate::validate`].

mod error;

pub use error::ParseError;

use std::fmt::Write as _;

use crate::config::WireFormat;
use crate::reading::{Field, Layout, Reading, ValueKind, CHANNEL_COUNT};

/// Result of parsing one line that was not rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A complete reading
    Reading(Reading),
    /// The header line for one of the layouts
    Header(Layout),
    /// Empty or whitespace-only line
    Blank,
}

impl ParsedLine {
    /// The reading, if this line carried one
    pub fn into_reading(self) -> Option<Reading> {
        match self {
            ParsedLine::Reading(reading) => Some(reading),
            _ => None,
        }
    }
}

/// Stateless parser for the delimited wire format
#[derive(Debug, Clone)]
pub struct LineParser {
    delimiter: char,
    column_names: Vec<String>,
    /// Header line per layout, in `Layout::ALL` order
    headers: Vec<(Layout, String)>,
}

impl LineParser {
    /// Create a parser for the given wire format
    pub fn new(format: &WireFormat) -> Self {
        Self {
            delimiter: format.delimiter,
            column_names: format.column_names.clone(),
            headers: Layout::ALL
                .iter()
                .map(|layout| (*layout, format.header(*layout)))
                .collect(),
        }
    }

    /// Field delimiter in use
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Header line for a layout
    pub fn header(&self, layout: Layout) -> &str {
        self.headers
            .iter()
            .find(|(l, _)| *l == layout)
            .map(|(_, h)| h.as_str())
            .unwrap_or_default()
    }

    /// Parse one line.
    ///
    /// Surrounding whitespace and line terminators are ignored. Either every
    /// field converts and a reading is returned, or the whole line is
    /// rejected; the first field that fails to convert is reported.
    pub fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ParsedLine::Blank);
        }

        if let Some((layout, _)) = self.headers.iter().find(|(_, h)| h == line) {
            return Ok(ParsedLine::Header(*layout));
        }

        let fields: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();
        let layout =
            Layout::from_field_count(fields.len()).ok_or_else(|| ParseError::FieldCountMismatch {
                found: fields.len(),
                expected: Layout::supported_field_counts(),
            })?;

        let time_ms = fields[0]
            .parse::<u64>()
            .map_err(|_| self.format_error(0, fields[0]))?;

        let mut values = [0.0; CHANNEL_COUNT];
        for (i, (field, text)) in layout.channels().iter().zip(&fields[1..]).enumerate() {
            values[i] = self.parse_value(*field, text, i + 1)?;
        }

        Reading::new(time_ms, layout, &values[..layout.channel_count()])
            .map(ParsedLine::Reading)
            .ok_or_else(|| ParseError::FieldCountMismatch {
                found: fields.len(),
                expected: Layout::supported_field_counts(),
            })
    }

    /// Parse a line and keep only a reading, if any
    pub fn parse_reading(&self, line: &str) -> Result<Option<Reading>, ParseError> {
        self.parse_line(line).map(ParsedLine::into_reading)
    }

    /// Encode a reading as a line in `layout`, without a line terminator.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value, so [`LineParser::parse_line`] reproduces the reading exactly.
    /// Channels the reading does not carry are written as their defaults.
    pub fn format_line(&self, reading: &Reading, layout: Layout) -> String {
        let mut line = String::with_capacity(16 * layout.field_count());
        let _ = write!(line, "{}", reading.time_ms());
        for field in layout.channels() {
            line.push(self.delimiter);
            let value = reading.value_or_default(*field);
            let _ = match field.kind() {
                ValueKind::Integer => write!(line, "{}", value as i64),
                ValueKind::Float => write!(line, "{}", value),
            };
        }
        line
    }

    fn parse_value(&self, field: Field, text: &str, index: usize) -> Result<f64, ParseError> {
        let value = match field.kind() {
            ValueKind::Integer => text.parse::<i64>().ok().map(|v| v as f64),
            ValueKind::Float => text.parse::<f64>().ok().filter(|v| v.is_finite()),
        };
        value.ok_or_else(|| self.format_error(index, text))
    }

    fn format_error(&self, index: usize, text: &str) -> ParseError {
        ParseError::FieldFormat {
            index,
            column: self.column_names.get(index).cloned().unwrap_or_default(),
            value: text.to_string(),
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(&WireFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXTENDED_LINE: &str =
        "123456;45.2;8120;0.78;62.3;0.5;0.3;1.0;2.1;0.5;9.8;48.8566;2.3522;150;75.2;74.8;73.5;74.1";

    #[test]
    fn test_parse_legacy_line() {
        let parser = LineParser::default();
        let reading = parser
            .parse_reading("100;10.5;2000;25;35.2\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(reading, Reading::legacy(100, 10.5, 2000, 25.0, 35.2));
    }

    #[test]
    fn test_parse_extended_line() {
        let parser = LineParser::default();
        let reading = parser.parse_reading(EXTENDED_LINE).unwrap().unwrap();
        assert_eq!(reading.layout(), Layout::Extended);
        assert_eq!(reading.time_ms(), 123456);
        assert_eq!(reading.rpm(), 8120);
        assert_eq!(reading.get(Field::GpsLat), Some(48.8566));
        assert_eq!(reading.get(Field::TireRr), Some(74.1));
    }

    #[test]
    fn test_headers_are_skipped() {
        let parser = LineParser::default();
        for layout in Layout::ALL {
            let header = parser.header(layout).to_string();
            assert_eq!(parser.parse_line(&header), Ok(ParsedLine::Header(layout)));
            assert_eq!(parser.parse_reading(&header), Ok(None));
        }
    }

    #[test]
    fn test_blank_line() {
        let parser = LineParser::default();
        assert_eq!(parser.parse_line("  \r\n"), Ok(ParsedLine::Blank));
    }

    #[test]
    fn test_wrong_field_count() {
        let parser = LineParser::default();
        for line in ["100;10.5;2000;25", "100;10.5;2000;25;35.2;1", "garbage"] {
            match parser.parse_line(line) {
                Err(ParseError::FieldCountMismatch { expected, .. }) => {
                    assert_eq!(expected, vec![5, 18])
                }
                other => panic!("expected FieldCountMismatch for {line:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_first_bad_field_is_reported() {
        let parser = LineParser::default();
        let err = parser.parse_line("100;fast;2000;x;35.2").unwrap_err();
        assert_eq!(err.field_index(), Some(1));
        assert_eq!(
            err,
            ParseError::FieldFormat {
                index: 1,
                column: "speed".into(),
                value: "fast".into(),
            }
        );
    }

    #[test]
    fn test_integer_fields_are_strict() {
        let parser = LineParser::default();
        assert_eq!(
            parser.parse_line("100;10.5;2000.5;25;35.2").unwrap_err().field_index(),
            Some(2)
        );
        assert_eq!(
            parser.parse_line("-5;10.5;2000;25;35.2").unwrap_err().field_index(),
            Some(0)
        );
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let parser = LineParser::default();
        assert!(parser.parse_line("100;NaN;2000;25;35.2").is_err());
        assert!(parser.parse_line("100;10.5;2000;inf;35.2").is_err());
    }

    #[test]
    fn test_negative_values_are_syntactically_valid() {
        let parser = LineParser::default();
        let reading = parser.parse_reading("100;-3.5;-10;25;35.2").unwrap().unwrap();
        assert_eq!(reading.speed(), -3.5);
        assert_eq!(reading.rpm(), -10);
    }

    #[test]
    fn test_format_line_round_trip() {
        let parser = LineParser::default();
        let reading = parser.parse_reading(EXTENDED_LINE).unwrap().unwrap();
        let line = parser.format_line(&reading, Layout::Extended);
        assert_eq!(parser.parse_reading(&line).unwrap(), Some(reading));

        let legacy = Reading::legacy(200, 15.3, 2500, 40.0, 35.5);
        assert_eq!(
            parser.format_line(&legacy, Layout::Legacy),
            "200;15.3;2500;40;35.5"
        );
    }

    #[test]
    fn test_custom_delimiter() {
        let format = WireFormat {
            delimiter: ',',
            ..WireFormat::default()
        };
        let parser = LineParser::new(&format);
        assert_eq!(parser.header(Layout::Legacy), "time_ms,speed,rpm,throttle,battery_temp");
        assert!(parser.parse_reading("100,10.5,2000,25,35.2").unwrap().is_some());
        assert!(parser.parse_line("100;10.5;2000;25;35.2").is_err());
    }
}

//! Legacy WOD text (CSV) variant to [`Document`].
//!
//! The input is a sequence of sections separated by a dash delimiter line.
//! Inside a section, first-column tokens drive a small state machine:
//!
//! ```text
//! CAST      ,,12345678      opens a cast            -> Header
//! METADATA                                          -> Metadata
//! VARIABLES ,Depth(m),F,O,Temperature(C),F,O        -> Variables
//! UNITS / Prof-Flag                                 -> Units / ProfFlag
//! 1         ,0.0,0, ,25.3,0,                         one measurement row
//! END OF VARIABLES SECTION                          -> None
//! ```
//!
//! Values and variable names sit at columns 1, 4, 7, ...

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};
use wod_common::vocab::MISSING_TOKENS;
use wod_common::{Cast, Document, Value, WodError, WodResult};

use crate::config::EngineConfig;
use crate::impute::impute;

const DELIMITER_DASHES: usize = 80;

/// Global attribute recorded for every text-decoded document.
pub const TEXT_SOURCE: &str = "WOD CSV File";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Header,
    Metadata,
    Variables,
    Units,
    ProfFlag,
}

/// Cast being assembled plus its buffered measurement rows.
struct OpenCast {
    cast: Cast,
    rows: Vec<Vec<Value>>,
}

struct TextDecoder<'a> {
    config: &'a EngineConfig,
    section: Section,
    variables: Vec<String>,
    current: Option<OpenCast>,
    casts: Vec<Cast>,
}

/// Decode the text variant of a cast file.
pub fn decode_text(text: &str, config: &EngineConfig) -> WodResult<Document> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut decoder = TextDecoder {
        config,
        section: Section::None,
        variables: Vec::new(),
        current: None,
        casts: Vec::new(),
    };

    for result in reader.records() {
        let record = result.map_err(|e| {
            WodError::MalformedContainer(format!("unreadable text row: {}", e))
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        decoder.row(&record, line)?;
    }
    decoder.close_cast();

    let mut document = Document::default();
    document
        .global_attributes
        .insert("source".to_string(), Value::from(TEXT_SOURCE));
    document.casts = decoder.casts;

    info!(casts = document.casts.len(), "Decoded text cast file");
    Ok(document)
}

impl TextDecoder<'_> {
    fn row(&mut self, record: &StringRecord, line: u64) -> WodResult<()> {
        let first = record.get(0).unwrap_or("").trim();

        if first.starts_with('#') {
            if is_delimiter(record) {
                self.section = Section::None;
            }
            return Ok(());
        }
        if first.is_empty() && record.iter().all(|field| field.trim().is_empty()) {
            return Ok(());
        }
        if is_delimiter(record) {
            self.section = Section::None;
            return Ok(());
        }

        match first {
            "CAST" => {
                self.close_cast();
                let mut cast = Cast::new();
                cast.insert("cast_number", text_cell(record, 2));
                self.current = Some(OpenCast {
                    cast,
                    rows: Vec::new(),
                });
                self.section = Section::Header;
                return Ok(());
            }
            "METADATA" => {
                self.section = Section::Metadata;
                return Ok(());
            }
            "VARIABLES" => {
                self.variables = stride(record)
                    .map(strip_units)
                    .filter(|name| !name.is_empty())
                    .collect();
                debug!(variables = ?self.variables, line, "Declared variables");
                self.section = Section::Variables;
                return Ok(());
            }
            "UNITS" => {
                self.section = Section::Units;
                return Ok(());
            }
            "Prof-Flag" => {
                self.section = Section::ProfFlag;
                return Ok(());
            }
            "END OF VARIABLES SECTION" => {
                self.section = Section::None;
                return Ok(());
            }
            _ => {}
        }

        let Some(open) = self.current.as_mut() else {
            return Err(WodError::MalformedContainer(format!(
                "line {}: content before the first CAST row",
                line
            )));
        };

        match self.section {
            Section::Header if !first.is_empty() => {
                open.cast.insert(first, text_cell(record, 2));
            }
            Section::Metadata if !first.is_empty() => {
                open.cast.insert(format!("metadata_{}", first), text_cell(record, 2));
            }
            Section::Header | Section::Metadata => {}
            _ if first.starts_with(|c: char| c.is_ascii_digit()) => {
                if self.variables.is_empty() {
                    return Err(WodError::MalformedContainer(format!(
                        "line {}: measurement row before any VARIABLES declaration",
                        line
                    )));
                }
                let mut values: Vec<Value> = stride(record).map(parse_token).collect();
                if values.len() < self.variables.len() {
                    return Err(WodError::MalformedContainer(format!(
                        "line {}: {} values for {} declared variables",
                        line,
                        values.len(),
                        self.variables.len()
                    )));
                }
                if values[self.variables.len()..].iter().any(|v| !v.is_null()) {
                    warn!(
                        line,
                        extra = values.len() - self.variables.len(),
                        "Truncating measurement values beyond the declared variables"
                    );
                }
                values.truncate(self.variables.len());
                open.rows.push(values);
            }
            _ => {
                debug!(line, token = first, "Ignoring row");
            }
        }
        Ok(())
    }

    /// Transpose buffered rows onto the declared variable names.
    fn close_cast(&mut self) {
        let Some(OpenCast { mut cast, rows }) = self.current.take() else {
            return;
        };

        if !rows.is_empty() {
            for (index, name) in self.variables.iter().enumerate() {
                // A later VARIABLES row may declare more names than early rows hold.
                let column: Vec<Value> = rows
                    .iter()
                    .map(|row| row.get(index).cloned().unwrap_or(Value::Null))
                    .collect();
                let column = if self.config.impute_text_measurements {
                    impute(column)
                } else {
                    column
                };
                cast.insert(name.clone(), Value::Sequence(column));
            }
        }

        debug!(rows = rows.len(), fields = cast.len(), "Closed cast");
        self.casts.push(cast);
    }
}

/// Columns 1, 4, 7, ...
fn stride(record: &StringRecord) -> impl Iterator<Item = &str> {
    record.iter().skip(1).step_by(3)
}

fn text_cell(record: &StringRecord, index: usize) -> Value {
    match record.get(index).map(str::trim) {
        Some(text) if !text.is_empty() => Value::Text(text.to_string()),
        _ => Value::Null,
    }
}

/// `Temperature(C)` -> `Temperature`
fn strip_units(name: &str) -> String {
    let name = name.trim();
    match (name.find('('), name.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            format!("{}{}", &name[..open], &name[close + 1..]).trim().to_string()
        }
        _ => name.to_string(),
    }
}

fn parse_token(raw: &str) -> Value {
    let token = raw.trim();
    if token.is_empty() || MISSING_TOKENS.contains(&token) {
        return Value::Null;
    }
    let parsed = if token.contains('.') {
        token.parse::<f64>().ok().map(Value::Float)
    } else {
        token.parse::<i64>().ok().map(Value::Integer)
    };
    parsed.unwrap_or_else(|| Value::Text(token.to_string()))
}

fn is_delimiter(record: &StringRecord) -> bool {
    let joined: String = record.iter().collect::<Vec<_>>().join(",");
    let body = joined
        .trim()
        .trim_start_matches('#')
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace());
    body.len() == DELIMITER_DASHES && body.chars().all(|c| c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimiter() -> String {
        format!("#{}", "-".repeat(80))
    }

    #[test]
    fn test_strip_units() {
        assert_eq!(strip_units("Depth(m)"), "Depth");
        assert_eq!(strip_units(" Temperature (C) "), "Temperature");
        assert_eq!(strip_units("Salinity"), "Salinity");
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token(" 25.300 "), Value::Float(25.3));
        assert_eq!(parse_token("12"), Value::Integer(12));
        assert_eq!(parse_token("---"), Value::Null);
        assert_eq!(parse_token("---*---"), Value::Null);
        assert_eq!(parse_token(""), Value::Null);
        assert_eq!(parse_token("1.2.3"), Value::Text("1.2.3".into()));
    }

    #[test]
    fn test_single_cast() {
        let text = format!(
            "{}\nCAST,,12345\nLatitude,,35.5\nVARIABLES,Depth(m),,,Temperature(C),,\n1,1.0,,,25.3,,\n",
            delimiter()
        );
        let doc = decode_text(&text, &EngineConfig::default()).unwrap();
        assert_eq!(
            doc.global_attributes.get("source"),
            Some(&Value::Text(TEXT_SOURCE.into()))
        );
        assert_eq!(doc.casts.len(), 1);
        let cast = &doc.casts[0];
        assert_eq!(cast.get("cast_number"), Some(&Value::Text("12345".into())));
        assert_eq!(cast.get("Latitude"), Some(&Value::Text("35.5".into())));
        assert_eq!(cast.get("Depth"), Some(&Value::Sequence(vec![Value::Float(1.0)])));
        assert_eq!(
            cast.get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(25.3)]))
        );
    }

    #[test]
    fn test_empty_stride_column_is_imputed() {
        // Depth sits in column 1 and is empty; the 1.0 in column 2 is a flag
        let text = format!(
            "{}\nCAST,,12345\nVARIABLES,Depth(m),,,Temperature(C),,\n1,,1.0,,25.3,,\n",
            delimiter()
        );
        let doc = decode_text(&text, &EngineConfig::default()).unwrap();
        let cast = &doc.casts[0];
        assert_eq!(cast.get("Depth"), Some(&Value::Sequence(vec![Value::Float(0.0)])));
        assert_eq!(
            cast.get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(25.3)]))
        );

        let config = EngineConfig {
            impute_text_measurements: false,
            ..EngineConfig::default()
        };
        let doc = decode_text(&text, &config).unwrap();
        assert_eq!(
            doc.casts[0].get("Depth"),
            Some(&Value::Sequence(vec![Value::Null]))
        );
    }

    #[test]
    fn test_delimiter_detection() {
        let record = StringRecord::from(vec![delimiter()]);
        assert!(is_delimiter(&record));
        let record = StringRecord::from(vec!["-".repeat(80), String::new()]);
        assert!(is_delimiter(&record));
        let record = StringRecord::from(vec!["---"]);
        assert!(!is_delimiter(&record));
    }

    #[test]
    fn test_content_before_cast() {
        let err = decode_text("Latitude,,35.5\n", &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "MalformedContainer");
    }
}

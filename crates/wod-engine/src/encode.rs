//! [`Document`] to binary container.
//!
//! Packed observation fields are written through a running offset per
//! field, advanced by each cast's `<field>_row_size` in cast order. This is
//! the mirror of the slicing done by the decoder.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, info, warn};
use wod_common::vocab::{
    companion_keys, is_observation_key, obs_dim, row_size_key, CASTS_DIM, INVESTIGATOR_DIM,
    LONG_TEXT_DIM, LONG_TEXT_WIDTH, SHORT_TEXT_DIM, SHORT_TEXT_WIDTH,
};
use wod_common::{
    Cast, CoercionWarning, Document, GlobalAttributes, InvestigatorInfo, TextWidth, Value,
    WodError, WodResult,
};

use crate::config::EngineConfig;
use crate::container::{is_valid_name, Attribute, ContainerWriter, NcValues, FILL_VALUE_ATTR};
use crate::schema::{infer_checked, ElementType, Layout, Schema, FLOAT_FILL, NARROW_FILL};

/// Encoded container bytes plus the values that had to be skipped.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Bytes,
    pub warnings: Vec<CoercionWarning>,
}

/// Infer a schema and encode in one step.
pub fn encode_document(document: &Document, config: &EngineConfig) -> WodResult<Encoded> {
    let schema = infer_checked(document, config)?;
    encode_binary(document, schema.as_ref())
}

/// Write `document` using a previously inferred schema.
pub fn encode_binary(document: &Document, schema: Option<&Schema>) -> WodResult<Encoded> {
    let schema = schema.ok_or_else(|| {
        WodError::SchemaMismatch("no schema: the document has no casts".to_string())
    })?;
    if schema.num_casts != document.casts.len() {
        return Err(WodError::SchemaMismatch(format!(
            "schema describes {} casts but the document has {}",
            schema.num_casts,
            document.casts.len()
        )));
    }

    let mut encoder = Encoder {
        writer: ContainerWriter::new(),
        warnings: Vec::new(),
        declared: HashSet::new(),
    };

    encoder.declare(schema)?;
    encoder.write_global_attributes(&document.global_attributes)?;
    if let Some(info) = &document.primary_investigator_info {
        encoder.write_investigators(info)?;
    }

    for (index, cast) in document.casts.iter().enumerate() {
        encoder.write_cast_fields(schema, index, cast)?;
    }
    encoder.write_packed_fields(schema, &document.casts)?;

    let Encoder {
        writer, warnings, ..
    } = encoder;
    let bytes = writer.finish()?;

    info!(
        casts = document.casts.len(),
        variables = schema.variables.len(),
        warnings = warnings.len(),
        bytes = bytes.len(),
        "Encoded binary cast file"
    );

    Ok(Encoded { bytes, warnings })
}

struct Encoder {
    writer: ContainerWriter,
    warnings: Vec<CoercionWarning>,
    /// Variables that were successfully declared.
    declared: HashSet<String>,
}

impl Encoder {
    fn warn(&mut self, cast_index: Option<usize>, field: &str, message: impl Into<String>) {
        let warning = CoercionWarning::new(cast_index, field, message);
        warn!(cast = ?warning.cast_index, field = %warning.field, "{}", warning.message);
        self.warnings.push(warning);
    }

    fn declare(&mut self, schema: &Schema) -> WodResult<()> {
        let w = &mut self.writer;
        w.add_dimension(CASTS_DIM, schema.num_casts)?;
        w.add_dimension(LONG_TEXT_DIM, LONG_TEXT_WIDTH)?;
        w.add_dimension(SHORT_TEXT_DIM, SHORT_TEXT_WIDTH)?;
        for (field, total) in &schema.observations {
            w.add_dimension(&obs_dim(field), *total)?;
        }
        if schema.investigator_count > 0 {
            w.add_dimension(INVESTIGATOR_DIM, schema.investigator_count)?;
        }

        for var in &schema.variables {
            if !is_valid_name(&var.name) {
                self.warn(None, &var.name, "variable not declared: not a valid container name");
                continue;
            }
            if self.writer.has_variable(&var.name) {
                self.warn(None, &var.name, "variable not declared: name already in use");
                continue;
            }
            let dims = var.dimensions();
            let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();
            let attrs = var
                .element_type
                .fill_value()
                .map(|fill| vec![Attribute::new(FILL_VALUE_ATTR, fill)])
                .unwrap_or_default();

            self.writer
                .add_variable(&var.name, var.element_type.nc_type(), &dim_refs, attrs)?;
            self.declared.insert(var.name.clone());
        }
        Ok(())
    }

    fn write_global_attributes(&mut self, attributes: &GlobalAttributes) -> WodResult<()> {
        for (name, value) in attributes {
            match attribute_values(value) {
                Ok(Some(values)) => {
                    if let Err(err) = self.writer.add_attribute(Attribute::new(name.clone(), values)) {
                        self.warn(None, name, format!("attribute not written: {}", err));
                    }
                }
                Ok(None) => {}
                Err(message) => self.warn(None, name, message),
            }
        }
        Ok(())
    }

    fn write_investigators(&mut self, info: &InvestigatorInfo) -> WodResult<()> {
        let widths = [TextWidth::Long, TextWidth::Short];
        for ((name, rows), width) in info.columns().into_iter().zip(widths) {
            if !self.declared.contains(name) {
                continue;
            }
            for (i, row) in rows.iter().enumerate() {
                let chars = self.fixed_text(None, name, row, width.width());
                self.put(name, i * width.width(), &NcValues::Char(chars))?;
            }
        }
        Ok(())
    }

    fn write_cast_fields(&mut self, schema: &Schema, index: usize, cast: &Cast) -> WodResult<()> {
        for var in &schema.variables {
            if !self.declared.contains(&var.name) {
                continue;
            }
            let Some(value) = cast.get(&var.name) else {
                continue;
            };
            match &var.layout {
                Layout::PerCast => {
                    if let Some(values) = self.coerce_scalar(index, &var.name, var.element_type, value) {
                        self.put(&var.name, index, &values)?;
                    }
                }
                Layout::PerCastText(width) => {
                    let Some(text) = self.text_of(index, &var.name, value) else {
                        continue;
                    };
                    let chars = self.fixed_text(Some(index), &var.name, &text, width.width());
                    self.put(&var.name, index * width.width(), &NcValues::Char(chars))?;
                }
                Layout::Packed { .. } | Layout::Investigator(_) => {}
            }
        }

        // Per-cast types and shapes come from the first cast; later
        // additions have nowhere to go.
        for (key, value) in cast.iter() {
            if value.is_null() || is_observation_key(key) || schema.variable(key).is_some() {
                continue;
            }
            self.warn(Some(index), key, "not declared by the first cast; value dropped");
        }
        Ok(())
    }

    fn write_packed_fields(&mut self, schema: &Schema, casts: &[Cast]) -> WodResult<()> {
        for (field, total) in &schema.observations {
            let companions = companion_keys(field);
            let mut start = 0usize;

            for (index, cast) in casts.iter().enumerate() {
                let row_size = match cast.row_size(field) {
                    Some(n) => n,
                    None => {
                        self.warn(Some(index), &row_size_key(field), "row size is not a non-negative integer");
                        0
                    }
                };

                if self.declared.contains(field.as_str()) {
                    self.write_slice(index, cast, field, ElementType::Float, start, row_size)?;
                }
                for companion in &companions {
                    if !cast.contains_key(companion) {
                        continue;
                    }
                    if !self.declared.contains(companion.as_str()) {
                        self.warn(Some(index), companion, "not declared by the first cast");
                        continue;
                    }
                    self.write_slice(index, cast, companion, ElementType::NarrowInt, start, row_size)?;
                }

                start = start.checked_add(row_size).ok_or_else(|| {
                    WodError::SchemaMismatch(format!(
                        "row sizes of '{}' add up past the addressable range at cast {}",
                        field, index
                    ))
                })?;
            }

            debug!(field = %field, written = start, total, "Packed observation field");
        }
        Ok(())
    }

    /// Write `cast[name]` into `[start, start + row_size)` of its packed
    /// variable. A length mismatch skips the slice and leaves fill values.
    fn write_slice(
        &mut self,
        index: usize,
        cast: &Cast,
        name: &str,
        element_type: ElementType,
        start: usize,
        row_size: usize,
    ) -> WodResult<()> {
        let Some(value) = cast.get(name) else {
            return Ok(());
        };
        let Some(items) = value.as_sequence() else {
            self.warn(Some(index), name, format!("expected a sequence, found {}", value.kind()));
            return Ok(());
        };
        if items.len() != row_size {
            self.warn(
                Some(index),
                name,
                format!("{} samples but row size is {}", items.len(), row_size),
            );
            return Ok(());
        }
        if items.is_empty() {
            return Ok(());
        }

        let values = match element_type {
            ElementType::NarrowInt => NcValues::Byte(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => NARROW_FILL,
                        other => to_i8(other).unwrap_or_else(|| {
                            self.warn(Some(index), name, format!("cannot store {} as a byte", other));
                            NARROW_FILL
                        }),
                    })
                    .collect(),
            ),
            _ => NcValues::Float(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => FLOAT_FILL,
                        other => to_f32(other).unwrap_or_else(|| {
                            self.warn(Some(index), name, format!("cannot store {} as a float", other));
                            FLOAT_FILL
                        }),
                    })
                    .collect(),
            ),
        };
        self.put(name, start, &values)
    }

    /// Coerce a per-cast value to the declared numeric type.
    fn coerce_scalar(
        &mut self,
        index: usize,
        name: &str,
        element_type: ElementType,
        value: &Value,
    ) -> Option<NcValues> {
        if value.is_null() {
            return None;
        }
        let coerced = match element_type {
            ElementType::Float => to_f32(value).map(|v| NcValues::Float(vec![v])),
            ElementType::WideInt => to_i32(value).map(|v| NcValues::Int(vec![v])),
            ElementType::NarrowInt => to_i8(value).map(|v| NcValues::Byte(vec![v])),
            ElementType::Text => None,
        };
        if coerced.is_none() {
            self.warn(
                Some(index),
                name,
                format!("cannot coerce {} '{}' to {:?}", value.kind(), value, element_type),
            );
        }
        coerced
    }

    fn text_of(&mut self, index: usize, name: &str, value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Text(text) => Some(text.clone()),
            Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => Some(value.to_string()),
            Value::Sequence(items) if items.iter().all(|item| item.as_str().is_some()) => {
                Some(items.iter().filter_map(Value::as_str).collect())
            }
            Value::Sequence(_) => {
                self.warn(Some(index), name, "cannot store a mixed sequence as text");
                None
            }
        }
    }

    /// ASCII bytes of `text`, truncated or space-padded to `width`.
    fn fixed_text(&mut self, index: Option<usize>, name: &str, text: &str, width: usize) -> Vec<u8> {
        let mut replaced = false;
        let mut bytes: Vec<u8> = text
            .chars()
            .take(width)
            .map(|c| {
                if c.is_ascii() {
                    c as u8
                } else {
                    replaced = true;
                    b'?'
                }
            })
            .collect();
        if replaced {
            self.warn(index, name, "non-ASCII characters replaced with '?'");
        }
        let len = text.chars().count();
        if len > width {
            self.warn(
                index,
                name,
                format!("text of {} characters truncated to {}", len, width),
            );
        }
        bytes.resize(width, b' ');
        bytes
    }

    fn put(&mut self, name: &str, start: usize, values: &NcValues) -> WodResult<()> {
        self.writer.put(name, start, values)
    }
}

/// Container representation of a global attribute; `Ok(None)` skips it.
fn attribute_values(value: &Value) -> Result<Option<NcValues>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(NcValues::Char(text.as_bytes().to_vec()))),
        Value::Boolean(b) => Ok(Some(NcValues::Int(vec![*b as i32]))),
        Value::Integer(i) => Ok(Some(match i32::try_from(*i) {
            Ok(v) => NcValues::Int(vec![v]),
            Err(_) => NcValues::Double(vec![*i as f64]),
        })),
        Value::Float(f) => Ok(Some(NcValues::Double(vec![*f]))),
        Value::Sequence(items) if items.is_empty() => Ok(None),
        Value::Sequence(items) => {
            let ints: Option<Vec<i32>> = items
                .iter()
                .map(|item| match item {
                    Value::Integer(i) => i32::try_from(*i).ok(),
                    _ => None,
                })
                .collect();
            if let Some(ints) = ints {
                return Ok(Some(NcValues::Int(ints)));
            }
            let floats: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
            floats
                .map(|floats| Some(NcValues::Double(floats)))
                .ok_or_else(|| "only numeric sequences can be stored as attributes".to_string())
        }
    }
}

fn to_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Integer(i) => Some(*i as f32),
        Value::Float(f) => Some(*f as f32),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(text) => text.trim().parse::<f64>().ok().map(|f| f as f32),
        _ => None,
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Boolean(b) => Some(*b as i64),
        Value::Text(text) => text.trim().parse().ok(),
        other => other.as_i64(),
    }
}

fn to_i32(value: &Value) -> Option<i32> {
    to_i64(value).and_then(|i| i32::try_from(i).ok())
}

/// The narrow fill itself is not storable as data.
fn to_i8(value: &Value) -> Option<i8> {
    to_i64(value)
        .and_then(|i| i8::try_from(i).ok())
        .filter(|&v| v != NARROW_FILL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::decode::decode_binary;
    use crate::schema::infer;

    fn cast(fields: Vec<(&str, Value)>) -> Cast {
        fields.into_iter().collect()
    }

    fn no_impute() -> EngineConfig {
        EngineConfig {
            impute_observations: false,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_without_schema() {
        let err = encode_binary(&Document::default(), None).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
        let err = encode_document(&Document::default(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn test_two_casts_one_sample_each() {
        let doc = Document {
            casts: vec![
                cast(vec![
                    ("Temperature", Value::from(vec![10.0])),
                    ("Temperature_row_size", Value::Integer(1)),
                ]),
                cast(vec![
                    ("Temperature", Value::from(vec![11.0])),
                    ("Temperature_row_size", Value::Integer(1)),
                ]),
            ],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert!(encoded.warnings.is_empty());

        let file = Container::from_bytes(&encoded.bytes).unwrap();
        assert_eq!(file.dimension("Temperature_obs").unwrap().len, 2);

        let back = decode_binary(encoded.bytes, &no_impute()).unwrap();
        assert_eq!(
            back.casts[0].get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(10.0)]))
        );
        assert_eq!(
            back.casts[1].get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(11.0)]))
        );
    }

    #[test]
    fn test_text_coercion_warning_skips_field() {
        let doc = Document {
            casts: vec![
                cast(vec![("lat", Value::Float(35.5))]),
                cast(vec![("lat", Value::from("north"))]),
                cast(vec![("lat", Value::from(" -12.25 "))]),
            ],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);
        assert_eq!(encoded.warnings[0].cast_index, Some(1));
        assert_eq!(encoded.warnings[0].field, "lat");

        let file = Container::from_bytes(&encoded.bytes).unwrap();
        assert_eq!(
            file.read_by_name("lat").unwrap(),
            NcValues::Float(vec![35.5, FLOAT_FILL, -12.25])
        );
    }

    #[test]
    fn test_length_mismatch_keeps_offsets() {
        let doc = Document {
            casts: vec![
                cast(vec![
                    ("z", Value::from(vec![1.0, 2.0, 3.0])),
                    ("z_row_size", Value::Integer(2)),
                ]),
                cast(vec![
                    ("z", Value::from(vec![7.0])),
                    ("z_row_size", Value::Integer(1)),
                ]),
            ],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);

        let file = Container::from_bytes(&encoded.bytes).unwrap();
        assert_eq!(
            file.read_by_name("z").unwrap(),
            NcValues::Float(vec![FLOAT_FILL, FLOAT_FILL, 7.0])
        );
    }

    #[test]
    fn test_fixed_text_padding_and_ascii() {
        let doc = Document {
            casts: vec![cast(vec![("country", Value::from("CÔTE"))])],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);

        let file = Container::from_bytes(&encoded.bytes).unwrap();
        let chars = file.read_by_name("country").unwrap();
        let bytes = chars.as_chars().unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..4], b"C?TE");
        assert!(bytes[4..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_long_text_truncation_warns() {
        let long = "A".repeat(60);
        let doc = Document {
            casts: vec![cast(vec![("country", Value::from(long.as_str()))])],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);
        assert_eq!(encoded.warnings[0].cast_index, Some(0));
        assert_eq!(encoded.warnings[0].field, "country");
        assert!(encoded.warnings[0].message.contains("truncated to 40"));

        let back = decode_binary(encoded.bytes, &EngineConfig::default()).unwrap();
        assert_eq!(back.casts[0].get("country"), Some(&Value::from(&long[..40])));
    }

    #[test]
    fn test_field_first_seen_on_later_cast_warns() {
        let doc = Document {
            casts: vec![
                cast(vec![("lat", Value::Float(1.0))]),
                cast(vec![("lat", Value::Float(2.0)), ("lon", Value::Float(140.0))]),
            ],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);
        assert_eq!(encoded.warnings[0].cast_index, Some(1));
        assert_eq!(encoded.warnings[0].field, "lon");

        let back = decode_binary(encoded.bytes, &EngineConfig::default()).unwrap();
        assert!(back.casts[1].get("lon").is_none());
        assert_eq!(back.casts[1].get("lat"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn test_invalid_variable_name_is_skipped() {
        let doc = Document {
            casts: vec![cast(vec![
                ("lat", Value::Float(1.0)),
                ("depth/m", Value::Float(5.0)),
            ])],
            ..Document::default()
        };
        let encoded = encode_document(&doc, &EngineConfig::default()).unwrap();
        assert_eq!(encoded.warnings.len(), 1);
        assert_eq!(encoded.warnings[0].field, "depth/m");
        assert_eq!(encoded.warnings[0].cast_index, None);
    }

    #[test]
    fn test_overflowing_row_sizes_are_schema_mismatch() {
        let huge = || {
            cast(vec![
                ("Temperature", Value::from(vec![1.0])),
                ("Temperature_row_size", Value::Integer(i64::MAX)),
            ])
        };
        let doc = Document {
            casts: vec![huge(), huge(), huge()],
            ..Document::default()
        };
        let err = encode_document(&doc, &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");

        // an unchecked schema saturates and is refused by the writer
        let err = encode_binary(&doc, infer(&doc).as_ref()).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn test_global_attribute_kinds() {
        assert_eq!(attribute_values(&Value::Null), Ok(None));
        assert_eq!(
            attribute_values(&Value::Integer(3)),
            Ok(Some(NcValues::Int(vec![3])))
        );
        assert_eq!(
            attribute_values(&Value::from(vec![1.5, 2.0])),
            Ok(Some(NcValues::Double(vec![1.5, 2.0])))
        );
        assert!(attribute_values(&Value::from(vec!["a", "b"])).is_err());
    }

    #[test]
    fn test_schema_cast_count_must_match() {
        let one = Document {
            casts: vec![cast(vec![("lat", Value::Float(1.0))])],
            ..Document::default()
        };
        let schema = infer(&one).unwrap();
        let two = Document {
            casts: vec![one.casts[0].clone(), one.casts[0].clone()],
            ..Document::default()
        };
        let err = encode_binary(&two, Some(&schema)).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }
}

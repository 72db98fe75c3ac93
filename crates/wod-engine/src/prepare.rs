//! Interchange JSON to an encodable [`Document`].
//!
//! Casts arriving on the write path may be arbitrarily nested. Each cast is
//! flattened into `parent_child` keys, observation values are cleaned to
//! floats, and every array-valued field gains a `<field>_row_size`.

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};
use wod_common::vocab::{
    is_investigator_key, row_size_key, OBSERVATION_FIELDS, PRIMARY_INVESTIGATOR,
    PRIMARY_INVESTIGATOR_VAR, SIGFIGS_SUFFIX, WODFLAG_SUFFIX,
};
use wod_common::{
    Cast, CoercionWarning, Document, GlobalAttributes, InvestigatorInfo, Value, WodError,
    WodResult,
};

const KEY_SEPARATOR: char = '_';

/// A prepared document and the values that were cleaned to Null.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub document: Document,
    pub warnings: Vec<CoercionWarning>,
}

/// Parse and prepare interchange JSON text.
pub fn prepare_document_str(json: &str) -> WodResult<Prepared> {
    let value: JsonValue = serde_json::from_str(json)?;
    prepare_document(value)
}

/// Prepare interchange JSON. A bare top-level array is taken as the cast
/// list.
pub fn prepare_document(json: JsonValue) -> WodResult<Prepared> {
    let mut root = match json {
        JsonValue::Object(root) => root,
        JsonValue::Array(casts) => {
            let mut root = Map::new();
            root.insert("casts".to_string(), JsonValue::Array(casts));
            root
        }
        other => {
            return Err(WodError::ValidationError(format!(
                "expected an object or an array of casts, found {}",
                json_kind(&other)
            )))
        }
    };

    let global_attributes = match root.remove("global_attributes") {
        None | Some(JsonValue::Null) => GlobalAttributes::new(),
        Some(JsonValue::Object(attrs)) => prepare_global_attributes(attrs)?,
        Some(other) => {
            return Err(WodError::ValidationError(format!(
                "'global_attributes' must be an object, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut warnings = Vec::new();
    let casts = match root.remove("casts") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, cast)| prepare_cast(index, cast, &mut warnings))
            .collect::<WodResult<Vec<_>>>()?,
        Some(other) => {
            return Err(WodError::ValidationError(format!(
                "'casts' must be an array, found {}",
                json_kind(&other)
            )))
        }
    };

    let primary_investigator_info = match root.remove("primary_investigator_info") {
        None | Some(JsonValue::Null) => None,
        Some(info) => Some(prepare_investigators(info)?),
    };

    for key in root.keys() {
        debug!(key = %key, "Ignoring unknown top-level key");
    }

    info!(
        casts = casts.len(),
        warnings = warnings.len(),
        "Prepared document"
    );

    Ok(Prepared {
        document: Document {
            global_attributes,
            casts,
            primary_investigator_info,
        },
        warnings,
    })
}

fn prepare_cast(
    index: usize,
    json: JsonValue,
    warnings: &mut Vec<CoercionWarning>,
) -> WodResult<Cast> {
    let fields = match json {
        JsonValue::Object(fields) => fields,
        other => {
            return Err(WodError::ValidationError(format!(
                "cast {} must be an object, found {}",
                index,
                json_kind(&other)
            )))
        }
    };

    let mut flat = Vec::new();
    flatten_object(fields, None, &mut flat)?;

    let mut cast = Cast::new();
    for (key, value) in flat {
        let value = if is_numeric_key(&key) {
            clean_numeric(index, &key, value, warnings)
        } else {
            leaf_value(&key, value)?
        };
        cast.insert(key, value);
    }

    let row_sizes: Vec<(String, i64)> = cast
        .iter()
        .filter(|(key, _)| !is_investigator_key(key))
        .filter_map(|(key, value)| {
            value
                .as_sequence()
                .map(|items| (row_size_key(key), items.len() as i64))
        })
        .collect();
    for (key, len) in row_sizes {
        cast.insert(key, Value::Integer(len));
    }

    Ok(cast)
}

/// Objects become `parent_child` keys; an array whose first element is an
/// object becomes `parent_<i>_child` keys. Later duplicates replace earlier
/// ones.
fn flatten_object(
    fields: Map<String, JsonValue>,
    parent: Option<&str>,
    out: &mut Vec<(String, JsonValue)>,
) -> WodResult<()> {
    for (key, value) in fields {
        let key = match parent {
            Some(parent) => format!("{}{}{}", parent, KEY_SEPARATOR, key),
            None => key,
        };
        match value {
            JsonValue::Object(children) => flatten_object(children, Some(key.as_str()), out)?,
            JsonValue::Array(items) if matches!(items.first(), Some(JsonValue::Object(_))) => {
                for (i, item) in items.into_iter().enumerate() {
                    let children = match item {
                        JsonValue::Object(children) => children,
                        other => {
                            return Err(WodError::ValidationError(format!(
                                "'{}' mixes objects with {} elements",
                                key,
                                json_kind(&other)
                            )))
                        }
                    };
                    let prefix = format!("{}{}{}", key, KEY_SEPARATOR, i);
                    flatten_object(children, Some(prefix.as_str()), out)?;
                }
            }
            leaf => out.push((key, leaf)),
        }
    }
    Ok(())
}

fn is_numeric_key(key: &str) -> bool {
    OBSERVATION_FIELDS.contains(&key)
        || key.ends_with(SIGFIGS_SUFFIX)
        || key.ends_with(WODFLAG_SUFFIX)
}

fn clean_numeric(
    index: usize,
    key: &str,
    json: JsonValue,
    warnings: &mut Vec<CoercionWarning>,
) -> Value {
    match json {
        JsonValue::Array(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| clean_number(index, key, item, warnings))
                .collect(),
        ),
        other => clean_number(index, key, other, warnings),
    }
}

fn clean_number(
    index: usize,
    key: &str,
    json: JsonValue,
    warnings: &mut Vec<CoercionWarning>,
) -> Value {
    let rejected = match json {
        JsonValue::Null => return Value::Null,
        JsonValue::Number(n) => match n.as_f64() {
            Some(v) => return Value::Float(v),
            None => n.to_string(),
        },
        JsonValue::Bool(b) => return Value::Float(if b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => match s.trim().parse::<f64>() {
            Ok(v) => return Value::Float(v),
            Err(_) => s,
        },
        other => json_kind(&other).to_string(),
    };

    let warning = CoercionWarning::new(
        Some(index),
        key,
        format!("invalid numeric value '{}' replaced with null", rejected),
    );
    warn!(cast = index, field = key, "{}", warning.message);
    warnings.push(warning);
    Value::Null
}

/// A non-observation leaf: a primitive or an array of primitives.
fn leaf_value(key: &str, json: JsonValue) -> WodResult<Value> {
    if !is_investigator_key(key) {
        check_primitive_array(key, &json)?;
    }
    Value::try_from(json)
        .map_err(|_| WodError::ValidationError(format!("nested object found for key '{}'", key)))
}

fn check_primitive_array(key: &str, json: &JsonValue) -> WodResult<()> {
    match json {
        JsonValue::Object(_) => Err(WodError::ValidationError(format!(
            "nested object found for key '{}'",
            key
        ))),
        JsonValue::Array(items) => {
            for item in items {
                match item {
                    JsonValue::Object(_) => {
                        return Err(WodError::ValidationError(format!(
                            "object inside the array for key '{}'",
                            key
                        )))
                    }
                    JsonValue::Array(_) => {
                        return Err(WodError::ValidationError(format!(
                            "invalid {} element in the array for key '{}'",
                            json_kind(item),
                            key
                        )))
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn prepare_global_attributes(attrs: Map<String, JsonValue>) -> WodResult<GlobalAttributes> {
    attrs
        .into_iter()
        .map(|(name, value)| {
            check_primitive_array(&name, &value)?;
            let value = Value::try_from(value)?;
            Ok((name, value))
        })
        .collect()
}

fn prepare_investigators(json: JsonValue) -> WodResult<InvestigatorInfo> {
    let mut info = match json {
        JsonValue::Object(info) => info,
        other => {
            return Err(WodError::ValidationError(format!(
                "'primary_investigator_info' must be an object, found {}",
                json_kind(&other)
            )))
        }
    };
    Ok(InvestigatorInfo {
        names: investigator_rows(PRIMARY_INVESTIGATOR, info.remove(PRIMARY_INVESTIGATOR))?,
        variables: investigator_rows(
            PRIMARY_INVESTIGATOR_VAR,
            info.remove(PRIMARY_INVESTIGATOR_VAR),
        )?,
    })
}

/// Rows are strings, or arrays of single-character strings that are joined.
fn investigator_rows(key: &str, json: Option<JsonValue>) -> WodResult<Vec<String>> {
    let items = match json {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items,
        Some(other) => {
            return Err(WodError::ValidationError(format!(
                "'{}' must be an array, found {}",
                key,
                json_kind(&other)
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            JsonValue::String(row) => Ok(row),
            JsonValue::Array(chars) => chars
                .into_iter()
                .map(|c| match c {
                    JsonValue::String(c) if c.chars().count() <= 1 => Ok(c),
                    other => Err(WodError::ValidationError(format!(
                        "'{}' character rows must hold single characters, found {}",
                        key, other
                    ))),
                })
                .collect::<WodResult<String>>(),
            other => Err(WodError::ValidationError(format!(
                "'{}' rows must be strings, found {}",
                key,
                json_kind(&other)
            ))),
        })
        .collect()
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

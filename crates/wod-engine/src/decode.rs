//! Binary container to [`Document`].
//!
//! Per-cast variables (first dimension `casts`) are copied element by
//! element. Packed observation variables are sliced back into per-cast
//! arrays using the cumulative sum of `<field>_row_size` in cast order; the
//! container stores no offsets.

use bytes::Bytes;
use tracing::{debug, info};
use wod_common::vocab::{
    companion_keys, is_investigator_key, row_size_key, CASTS_DIM, CLASSIFICATION_ATTR,
    PRIMARY_INVESTIGATOR, PRIMARY_INVESTIGATOR_VAR,
};
use wod_common::{Cast, Document, FileSubtype, InvestigatorInfo, Value, WodError, WodResult};

use crate::config::EngineConfig;
use crate::container::{Container, NcValues, VariableInfo};
use crate::impute::impute_value;
use crate::normalize::{attribute_native, native_elements, normalize, normalize_sequence, MissingRule};

/// Decode a binary cast file held in memory.
pub fn decode_binary(bytes: impl Into<Bytes>, config: &EngineConfig) -> WodResult<Document> {
    let bytes: Bytes = bytes.into();
    let file = Container::from_bytes(&bytes)?;
    decode_container(&file, config)
}

/// Resolve the subtype of an opened container.
pub fn detect_subtype(file: &Container) -> FileSubtype {
    let classification = file
        .attribute(CLASSIFICATION_ATTR)
        .and_then(|attr| attr.as_text());
    FileSubtype::resolve(
        classification.as_deref(),
        |name| file.dimension(name).is_some(),
        |name| file.variable(name).is_some(),
    )
}

/// Decode an already opened container.
pub fn decode_container(file: &Container, config: &EngineConfig) -> WodResult<Document> {
    let num_casts = file.dimension(CASTS_DIM).map(|dim| dim.len).ok_or_else(|| {
        WodError::MalformedContainer(format!("missing required '{}' dimension", CASTS_DIM))
    })?;

    let subtype = detect_subtype(file);
    debug!(subtype = %subtype, casts = num_casts, "Resolved file subtype");

    let mut document = Document::default();

    for attr in file.attributes() {
        let value = normalize(&attribute_native(&attr.values))?;
        document.global_attributes.insert(attr.name.clone(), value);
    }

    document.primary_investigator_info = read_investigators(file)?;

    let mut casts = vec![Cast::new(); num_casts];
    read_per_cast_variables(file, &mut casts)?;

    for field in subtype.observation_fields() {
        read_packed_field(file, field, &mut casts, config)?;
    }

    document.casts = casts;

    info!(
        subtype = %subtype,
        casts = document.casts.len(),
        attributes = document.global_attributes.len(),
        "Decoded binary cast file"
    );

    Ok(document)
}

/// A variable read in full together with its masking rule.
struct Loaded<'a> {
    var: &'a VariableInfo,
    values: NcValues,
    rule: MissingRule,
}

impl<'a> Loaded<'a> {
    fn read(file: &Container, var: &'a VariableInfo) -> WodResult<Self> {
        Ok(Self {
            var,
            values: file.read(var)?,
            rule: MissingRule::for_variable(var),
        })
    }
}

fn read_per_cast_variables(file: &Container, casts: &mut [Cast]) -> WodResult<()> {
    let per_cast = file
        .variables()
        .iter()
        .filter(|var| var.dimensions.first().map(String::as_str) == Some(CASTS_DIM))
        .filter(|var| !is_investigator_key(&var.name));

    for var in per_cast {
        let loaded = Loaded::read(file, var)?;
        let inner: usize = var.shape.iter().skip(1).product();
        debug!(variable = %var.name, element_type = %var.type_name, inner, "Reading per-cast variable");

        for (i, cast) in casts.iter_mut().enumerate() {
            let native = native_elements(&loaded.values, i * inner..(i + 1) * inner, &loaded.rule)
                .ok_or_else(|| {
                    WodError::MalformedContainer(format!(
                        "variable '{}' is shorter than the '{}' dimension",
                        loaded.var.name, CASTS_DIM
                    ))
                })?;
            let value = normalize(&native)?;
            if !value.is_null() {
                cast.insert(loaded.var.name.clone(), value);
            }
        }
    }
    Ok(())
}

fn read_packed_field(
    file: &Container,
    field: &str,
    casts: &mut [Cast],
    config: &EngineConfig,
) -> WodResult<()> {
    let row_size_name = row_size_key(field);
    let Some(row_size_var) = file.variable(&row_size_name) else {
        return Ok(());
    };
    let packed_var = file.variable(field).ok_or_else(|| {
        WodError::MalformedContainer(format!(
            "'{}' present without packed variable '{}'",
            row_size_name, field
        ))
    })?;

    let packed = Loaded::read(file, packed_var)?;
    let row_sizes = read_row_sizes(
        &Loaded::read(file, row_size_var)?,
        casts.len(),
        packed.values.len(),
    )?;
    let companions = companion_keys(field)
        .iter()
        .filter_map(|name| file.variable(name))
        .map(|var| Loaded::read(file, var))
        .collect::<WodResult<Vec<_>>>()?;

    let mut start = 0usize;
    for (cast, &row_size) in casts.iter_mut().zip(&row_sizes) {
        let end = start.checked_add(row_size).ok_or_else(|| {
            WodError::MalformedContainer(format!(
                "'{}' row sizes overflow the packed offset",
                row_size_name
            ))
        })?;

        let slice = slice_packed(&packed, start, end)?;
        let slice = if config.impute_observations {
            impute_value(slice)
        } else {
            slice
        };
        cast.insert(field, slice);

        for companion in &companions {
            let slice = slice_packed(companion, start, end)?;
            cast.insert(companion.var.name.clone(), slice);
        }

        start = end;
    }

    debug!(field, total = start, packed = packed.values.len(), "Unpacked observation field");
    Ok(())
}

/// Row sizes in cast order; masked entries count as zero. No single row
/// may exceed `packed_len`, the length of the packed variable.
fn read_row_sizes(
    loaded: &Loaded<'_>,
    num_casts: usize,
    packed_len: usize,
) -> WodResult<Vec<usize>> {
    if loaded.values.len() != num_casts {
        return Err(WodError::MalformedContainer(format!(
            "'{}' has {} entries for {} casts",
            loaded.var.name,
            loaded.values.len(),
            num_casts
        )));
    }

    (0..num_casts)
        .map(|i| {
            let scalar = match loaded.values.get(i) {
                Some(scalar) if !loaded.rule.is_missing(scalar) => scalar,
                _ => return Ok(0),
            };
            let raw = scalar.as_f64();
            if raw < 0.0 || raw.fract() != 0.0 {
                return Err(WodError::MalformedContainer(format!(
                    "'{}' holds invalid row size {} for cast {}",
                    loaded.var.name, raw, i
                )));
            }
            if raw > packed_len as f64 {
                return Err(WodError::MalformedContainer(format!(
                    "'{}' row size {} for cast {} exceeds {} packed values",
                    loaded.var.name, raw, i, packed_len
                )));
            }
            Ok(raw as usize)
        })
        .collect()
}

fn slice_packed(loaded: &Loaded<'_>, start: usize, end: usize) -> WodResult<Value> {
    let native = native_elements(&loaded.values, start..end, &loaded.rule).ok_or_else(|| {
        WodError::MalformedContainer(format!(
            "slice {}..{} exceeds '{}' of length {}",
            start,
            end,
            loaded.var.name,
            loaded.values.len()
        ))
    })?;
    normalize_sequence(&native)
}

/// Investigator names and roles, one fixed-width text row each.
fn read_investigators(file: &Container) -> WodResult<Option<InvestigatorInfo>> {
    let Some(names_var) = file.variable(PRIMARY_INVESTIGATOR) else {
        return Ok(None);
    };

    let names = read_text_rows(file, names_var)?;
    let variables = match file.variable(PRIMARY_INVESTIGATOR_VAR) {
        Some(var) => read_text_rows(file, var)?,
        None => Vec::new(),
    };

    Ok(Some(InvestigatorInfo { names, variables }))
}

fn read_text_rows(file: &Container, var: &VariableInfo) -> WodResult<Vec<String>> {
    let loaded = Loaded::read(file, var)?;
    let rows = var.shape.first().copied().unwrap_or(0);
    let width: usize = var.shape.iter().skip(1).product();

    (0..rows)
        .map(|i| {
            let native = native_elements(&loaded.values, i * width..(i + 1) * width, &loaded.rule)
                .ok_or_else(|| {
                    WodError::MalformedContainer(format!("'{}' is truncated", var.name))
                })?;
            Ok(match normalize(&native)? {
                Value::Text(text) => text,
                other => other.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Attribute, ContainerWriter, NcType};

    fn fill(v: f32) -> Vec<Attribute> {
        vec![Attribute::new("_FillValue", NcValues::Float(vec![v]))]
    }

    /// Two XBT casts: 2 and 1 temperature samples, one masked.
    fn xbt_file() -> Bytes {
        let mut w = ContainerWriter::new();
        w.add_dimension("casts", 2).unwrap();
        w.add_dimension("z_obs", 3).unwrap();
        w.add_dimension("Temperature_obs", 3).unwrap();
        w.add_attribute(Attribute::text("institution", "NODC")).unwrap();
        w.add_variable("z", NcType::Float, &["z_obs"], fill(-9999.0)).unwrap();
        w.add_variable("Temperature", NcType::Float, &["Temperature_obs"], fill(-9999.0))
            .unwrap();
        w.add_variable("z_row_size", NcType::Int, &["casts"], vec![]).unwrap();
        w.add_variable("Temperature_row_size", NcType::Int, &["casts"], vec![])
            .unwrap();
        w.add_variable("lat", NcType::Float, &["casts"], vec![]).unwrap();

        w.put("z", 0, &NcValues::Float(vec![0.0, 5.0, 0.0])).unwrap();
        w.put("Temperature", 0, &NcValues::Float(vec![20.0, 18.0, -9999.0]))
            .unwrap();
        w.put("z_row_size", 0, &NcValues::Int(vec![2, 1])).unwrap();
        w.put("Temperature_row_size", 0, &NcValues::Int(vec![2, 1])).unwrap();
        w.put("lat", 0, &NcValues::Float(vec![35.5])).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_decode_xbt() {
        let doc = decode_binary(xbt_file(), &EngineConfig::default()).unwrap();
        assert_eq!(
            doc.global_attributes.get("institution"),
            Some(&Value::Text("NODC".into()))
        );
        assert_eq!(doc.casts.len(), 2);
        assert_eq!(doc.casts[0].get("lat"), Some(&Value::Float(35.5)));
        // second cast's lat was never written: masked, so omitted
        assert!(doc.casts[1].get("lat").is_none());
        assert_eq!(
            doc.casts[0].get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(20.0), Value::Float(18.0)]))
        );
        // a lone masked sample with nothing to average imputes to zero
        assert_eq!(
            doc.casts[1].get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(0.0)]))
        );
        assert_eq!(doc.casts[1].get("Temperature_row_size"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_decode_without_imputation_keeps_null() {
        let config = EngineConfig {
            impute_observations: false,
            ..EngineConfig::default()
        };
        let doc = decode_binary(xbt_file(), &config).unwrap();
        assert_eq!(
            doc.casts[1].get("Temperature"),
            Some(&Value::Sequence(vec![Value::Null]))
        );
    }

    #[test]
    fn test_missing_casts_dimension() {
        let mut w = ContainerWriter::new();
        w.add_dimension("stations", 1).unwrap();
        let err = decode_binary(w.finish().unwrap(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "MalformedContainer");
    }

    #[test]
    fn test_row_sizes_exceeding_storage() {
        let mut w = ContainerWriter::new();
        w.add_dimension("casts", 2).unwrap();
        w.add_dimension("Temperature_obs", 2).unwrap();
        w.add_variable("Temperature", NcType::Float, &["Temperature_obs"], vec![])
            .unwrap();
        w.add_variable("Temperature_row_size", NcType::Int, &["casts"], vec![])
            .unwrap();
        w.put("Temperature_row_size", 0, &NcValues::Int(vec![2, 1])).unwrap();
        let err = decode_binary(w.finish().unwrap(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "MalformedContainer");
    }

    #[test]
    fn test_huge_row_size_is_rejected() {
        let mut w = ContainerWriter::new();
        w.add_dimension("casts", 2).unwrap();
        w.add_dimension("Temperature_obs", 2).unwrap();
        w.add_attribute(Attribute::text("cdm_data_type", "XBT")).unwrap();
        w.add_variable("Temperature", NcType::Float, &["Temperature_obs"], vec![])
            .unwrap();
        w.add_variable("Temperature_row_size", NcType::Double, &["casts"], vec![])
            .unwrap();
        w.put("Temperature", 0, &NcValues::Float(vec![20.0, 18.0])).unwrap();
        w.put("Temperature_row_size", 0, &NcValues::Double(vec![1.0, 1.0e30]))
            .unwrap();

        let err = decode_binary(w.finish().unwrap(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "MalformedContainer");
        assert!(err.to_string().contains("exceeds 2 packed values"));
    }

    #[test]
    fn test_unknown_subtype_skips_packed_fields() {
        let mut w = ContainerWriter::new();
        w.add_dimension("casts", 1).unwrap();
        w.add_dimension("Oxygen_obs", 1).unwrap();
        w.add_variable("Oxygen", NcType::Float, &["Oxygen_obs"], vec![]).unwrap();
        w.add_variable("Oxygen_row_size", NcType::Int, &["casts"], vec![]).unwrap();
        w.put("Oxygen_row_size", 0, &NcValues::Int(vec![1])).unwrap();
        let bytes = w.finish().unwrap();

        let file = Container::from_bytes(&bytes).unwrap();
        assert_eq!(detect_subtype(&file), FileSubtype::Unknown);
        let doc = decode_container(&file, &EngineConfig::default()).unwrap();
        assert!(doc.casts[0].get("Oxygen").is_none());
        assert_eq!(doc.casts[0].get("Oxygen_row_size"), Some(&Value::Integer(1)));
    }
}

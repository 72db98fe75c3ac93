//! Write-back layout inferred from a [`Document`].
//!
//! Types and shapes of per-cast fields come from the first cast only. With
//! `strict_schema` enabled the remaining casts are checked against that
//! choice; otherwise a disagreeing value surfaces as a coercion warning when
//! the encoder writes it.

use serde::Serialize;
use tracing::debug;
use wod_common::vocab::{
    is_observation_key, obs_dim, row_size_key, sigfigs_key, wodflag_key, CASTS_DIM,
    INVESTIGATOR_DIM, OBSERVATION_FIELDS, PRIMARY_INVESTIGATOR, PRIMARY_INVESTIGATOR_VAR,
};
use wod_common::{Document, TextWidth, Value, WodError, WodResult};

use crate::config::EngineConfig;
use crate::container::{NcType, NcValues};

pub const FLOAT_FILL: f32 = -9999.0;
pub const NARROW_FILL: i8 = -127;
pub const WIDE_FILL: i32 = -9999;

/// Storage element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    NarrowInt,
    WideInt,
    Float,
}

impl ElementType {
    pub fn nc_type(self) -> NcType {
        match self {
            ElementType::Text => NcType::Char,
            ElementType::NarrowInt => NcType::Byte,
            ElementType::WideInt => NcType::Int,
            ElementType::Float => NcType::Float,
        }
    }

    /// `_FillValue` declared on write; text has none.
    pub fn fill_value(self) -> Option<NcValues> {
        match self {
            ElementType::Text => None,
            ElementType::NarrowInt => Some(NcValues::Byte(vec![NARROW_FILL])),
            ElementType::WideInt => Some(NcValues::Int(vec![WIDE_FILL])),
            ElementType::Float => Some(NcValues::Float(vec![FLOAT_FILL])),
        }
    }
}

/// Dimensionality of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `(casts)`
    PerCast,
    /// `(casts, width)`
    PerCastText(TextWidth),
    /// `(<field>_obs)`
    Packed { field: String },
    /// `(numberofpis, width)`
    Investigator(TextWidth),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableSchema {
    pub name: String,
    pub element_type: ElementType,
    pub layout: Layout,
}

impl VariableSchema {
    /// Dimension names, outermost first.
    pub fn dimensions(&self) -> Vec<String> {
        match &self.layout {
            Layout::PerCast => vec![CASTS_DIM.to_string()],
            Layout::PerCastText(width) => vec![CASTS_DIM.to_string(), width.dimension().to_string()],
            Layout::Packed { field } => vec![obs_dim(field)],
            Layout::Investigator(width) => {
                vec![INVESTIGATOR_DIM.to_string(), width.dimension().to_string()]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub num_casts: usize,
    /// Included observation fields with their packed lengths, in vocabulary order.
    pub observations: Vec<(String, usize)>,
    /// Rows of the investigator arrays; 0 when absent.
    pub investigator_count: usize,
    pub variables: Vec<VariableSchema>,
}

impl Schema {
    pub fn variable(&self, name: &str) -> Option<&VariableSchema> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Summed row sizes of every observation field; `None` when the sum does
/// not fit in `usize`.
fn packed_totals(document: &Document) -> Vec<(&'static str, Option<usize>)> {
    OBSERVATION_FIELDS
        .iter()
        .map(|field| {
            let total = document.casts.iter().try_fold(0usize, |acc, cast| {
                acc.checked_add(cast.row_size(field).unwrap_or(0))
            });
            (*field, total)
        })
        .collect()
}

/// Infer the layout needed to write `document`; `None` without casts.
///
/// A packed total too large to address saturates; [`infer_checked`]
/// reports it instead.
pub fn infer(document: &Document) -> Option<Schema> {
    let first = document.casts.first()?;

    let observations: Vec<(String, usize)> = packed_totals(document)
        .into_iter()
        .map(|(field, total)| (field.to_string(), total.unwrap_or(usize::MAX)))
        .filter(|(_, total)| *total > 0)
        .collect();

    let mut variables = Vec::new();

    for (key, value) in first.iter() {
        if is_observation_key(key) {
            continue;
        }
        let (element_type, layout) = match value {
            Value::Text(_) => (ElementType::Text, Layout::PerCastText(TextWidth::for_field(key))),
            Value::Integer(_) | Value::Boolean(_) => (ElementType::WideInt, Layout::PerCast),
            _ => (ElementType::Float, Layout::PerCast),
        };
        variables.push(VariableSchema {
            name: key.clone(),
            element_type,
            layout,
        });
    }

    // Row sizes are the only offsets a reader has, so they are declared
    // even when the first cast lacks them.
    for (field, _) in &observations {
        let row_size = row_size_key(field);
        if !first.contains_key(&row_size) {
            variables.push(VariableSchema {
                name: row_size,
                element_type: ElementType::WideInt,
                layout: Layout::PerCast,
            });
        }
    }

    for (field, _) in &observations {
        variables.push(VariableSchema {
            name: field.clone(),
            element_type: ElementType::Float,
            layout: Layout::Packed {
                field: field.clone(),
            },
        });
        for companion in [sigfigs_key(field), wodflag_key(field)] {
            if first.contains_key(&companion) {
                variables.push(VariableSchema {
                    name: companion,
                    element_type: ElementType::NarrowInt,
                    layout: Layout::Packed {
                        field: field.clone(),
                    },
                });
            }
        }
    }

    let investigator_count = match &document.primary_investigator_info {
        Some(info) if !info.is_empty() => {
            variables.push(VariableSchema {
                name: PRIMARY_INVESTIGATOR.to_string(),
                element_type: ElementType::Text,
                layout: Layout::Investigator(TextWidth::Long),
            });
            variables.push(VariableSchema {
                name: PRIMARY_INVESTIGATOR_VAR.to_string(),
                element_type: ElementType::Text,
                layout: Layout::Investigator(TextWidth::Short),
            });
            info.len()
        }
        _ => 0,
    };

    debug!(
        casts = document.casts.len(),
        variables = variables.len(),
        observations = observations.len(),
        "Inferred schema"
    );

    Some(Schema {
        num_casts: document.casts.len(),
        observations,
        investigator_count,
        variables,
    })
}

/// [`infer`], rejecting packed totals beyond `usize` and additionally
/// validating every cast when `strict_schema` is set.
pub fn infer_checked(document: &Document, config: &EngineConfig) -> WodResult<Option<Schema>> {
    if let Some((field, _)) = packed_totals(document)
        .into_iter()
        .find(|(_, total)| total.is_none())
    {
        return Err(WodError::SchemaMismatch(format!(
            "row sizes of '{}' add up past the addressable range",
            field
        )));
    }

    let schema = infer(document);
    if let (Some(schema), true) = (&schema, config.strict_schema) {
        validate_casts(document, schema)?;
    }
    Ok(schema)
}

/// Check that every cast's per-cast fields fit the types chosen from the
/// first cast.
pub fn validate_casts(document: &Document, schema: &Schema) -> WodResult<()> {
    for (index, cast) in document.casts.iter().enumerate().skip(1) {
        for var in &schema.variables {
            if !matches!(var.layout, Layout::PerCast | Layout::PerCastText(_)) {
                continue;
            }
            let Some(value) = cast.get(&var.name) else {
                continue;
            };
            let fits = match (var.element_type, value) {
                (_, Value::Null) => true,
                (ElementType::Text, Value::Text(_)) => true,
                (ElementType::WideInt | ElementType::NarrowInt, v) => {
                    matches!(v, Value::Boolean(_)) || v.as_i64().is_some()
                }
                (ElementType::Float, v) => v.is_numeric() || matches!(v, Value::Boolean(_)),
                _ => false,
            };
            if !fits {
                return Err(WodError::SchemaMismatch(format!(
                    "cast {} field '{}' is {} but the first cast declares {:?}",
                    index,
                    var.name,
                    value.kind(),
                    var.element_type
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wod_common::{Cast, InvestigatorInfo};

    fn cast(fields: Vec<(&str, Value)>) -> Cast {
        fields.into_iter().collect()
    }

    fn doc(casts: Vec<Cast>) -> Document {
        Document {
            casts,
            ..Document::default()
        }
    }

    #[test]
    fn test_empty_document() {
        assert!(infer(&Document::default()).is_none());
    }

    #[test]
    fn test_scalar_classification() {
        let d = doc(vec![cast(vec![
            ("country", Value::from("JAPAN")),
            ("Platform", Value::from("R/V Hakuho Maru")),
            ("wod_unique_cast", Value::Integer(42)),
            ("lat", Value::Float(35.5)),
            ("notes", Value::Null),
        ])]);
        let schema = infer(&d).unwrap();

        let country = schema.variable("country").unwrap();
        assert_eq!(country.element_type, ElementType::Text);
        assert_eq!(country.dimensions(), vec!["casts", "strnlensmall"]);
        let platform = schema.variable("Platform").unwrap();
        assert_eq!(platform.layout, Layout::PerCastText(TextWidth::Long));
        assert_eq!(
            schema.variable("wod_unique_cast").unwrap().element_type,
            ElementType::WideInt
        );
        assert_eq!(schema.variable("lat").unwrap().element_type, ElementType::Float);
        assert_eq!(schema.variable("notes").unwrap().element_type, ElementType::Float);
    }

    #[test]
    fn test_observation_totals() {
        let d = doc(vec![
            cast(vec![
                ("Temperature", Value::from(vec![10.0])),
                ("Temperature_row_size", Value::Integer(1)),
                ("Temperature_WODflag", Value::from(vec![0])),
                ("Salinity_row_size", Value::Integer(0)),
            ]),
            cast(vec![
                ("Temperature", Value::from(vec![11.0, 12.0])),
                ("Temperature_row_size", Value::Integer(2)),
                ("Temperature_WODflag", Value::from(vec![0, 0])),
                ("Temperature_sigfigs", Value::from(vec![3, 3])),
            ]),
        ]);
        let schema = infer(&d).unwrap();
        assert_eq!(schema.observations, vec![("Temperature".to_string(), 3)]);

        let temp = schema.variable("Temperature").unwrap();
        assert_eq!(temp.dimensions(), vec!["Temperature_obs"]);
        assert_eq!(
            schema.variable("Temperature_WODflag").unwrap().element_type,
            ElementType::NarrowInt
        );
        // sigfigs only on the second cast: not declared
        assert!(schema.variable("Temperature_sigfigs").is_none());
        assert!(schema.variable("Salinity").is_none());
        assert_eq!(
            schema.variable("Temperature_row_size").unwrap().element_type,
            ElementType::WideInt
        );
    }

    #[test]
    fn test_row_size_declared_when_first_cast_lacks_it() {
        let d = doc(vec![
            cast(vec![("lat", Value::Float(1.0))]),
            cast(vec![
                ("Salinity", Value::from(vec![34.5])),
                ("Salinity_row_size", Value::Integer(1)),
            ]),
        ]);
        let schema = infer(&d).unwrap();
        assert_eq!(schema.observations, vec![("Salinity".to_string(), 1)]);
        let row_size = schema.variable("Salinity_row_size").unwrap();
        assert_eq!(row_size.element_type, ElementType::WideInt);
        assert_eq!(row_size.layout, Layout::PerCast);
    }

    #[test]
    fn test_overflowing_row_sizes() {
        let huge = || {
            cast(vec![
                ("Temperature", Value::from(vec![1.0])),
                ("Temperature_row_size", Value::Integer(i64::MAX)),
            ])
        };
        let d = doc(vec![huge(), huge(), huge()]);

        let schema = infer(&d).unwrap();
        assert_eq!(schema.observations, vec![("Temperature".to_string(), usize::MAX)]);

        let err = infer_checked(&d, &EngineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
        assert!(err.to_string().contains("Temperature"));
    }

    #[test]
    fn test_investigators() {
        let mut d = doc(vec![cast(vec![("lat", Value::Float(1.0))])]);
        d.primary_investigator_info = Some(InvestigatorInfo {
            names: vec!["SMITH".into(), "JONES".into()],
            variables: vec!["all".into(), "Temperature".into()],
        });
        let schema = infer(&d).unwrap();
        assert_eq!(schema.investigator_count, 2);
        assert_eq!(
            schema.variable(PRIMARY_INVESTIGATOR).unwrap().dimensions(),
            vec!["numberofpis", "strnlen"]
        );
        assert_eq!(
            schema.variable(PRIMARY_INVESTIGATOR_VAR).unwrap().dimensions(),
            vec!["numberofpis", "strnlensmall"]
        );

        d.primary_investigator_info = Some(InvestigatorInfo::default());
        let schema = infer(&d).unwrap();
        assert_eq!(schema.investigator_count, 0);
        assert!(schema.variable(PRIMARY_INVESTIGATOR).is_none());
    }

    #[test]
    fn test_strict_mode_rejects_disagreement() {
        let d = doc(vec![
            cast(vec![("lat", Value::Float(1.0))]),
            cast(vec![("lat", Value::from("north"))]),
        ]);
        let lenient = infer_checked(&d, &EngineConfig::default()).unwrap();
        assert!(lenient.is_some());

        let strict = EngineConfig {
            strict_schema: true,
            ..EngineConfig::default()
        };
        let err = infer_checked(&d, &strict).unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }
}

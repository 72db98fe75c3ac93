//! Conversion of container-native elements into [`Value`]s.
//!
//! Each native representation class has exactly one rule:
//!
//! | native                        | value                              |
//! |-------------------------------|------------------------------------|
//! | masked element                | `Null`                             |
//! | integer element               | `Integer`                          |
//! | float element (NaN is masked) | `Float`                            |
//! | fixed-length char run         | `Text`, trailing padding trimmed   |
//! | one-element array             | the element itself                 |
//! | longer array                  | `Sequence`                         |
//!
//! An unsigned 64-bit element beyond the signed range has no rule.

use wod_common::{Value, WodError, WodResult};

use crate::container::{
    NcScalar, NcType, NcValues, VariableInfo, FILL_VALUE_ATTR, MISSING_VALUE_ATTR,
};

/// A container element before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Masked,
    Scalar(NcScalar),
    Chars(Vec<u8>),
    Array(Vec<NativeValue>),
}

/// Decides which stored elements of a variable count as missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissingRule {
    sentinel: Option<NcScalar>,
}

impl MissingRule {
    /// No sentinel; only NaN is treated as missing.
    pub fn none() -> Self {
        Self { sentinel: None }
    }

    /// `_FillValue`, else `missing_value`, else the default fill of the
    /// element type. Byte and char variables have no implicit sentinel.
    pub fn for_variable(var: &VariableInfo) -> Self {
        let explicit = [FILL_VALUE_ATTR, MISSING_VALUE_ATTR]
            .iter()
            .find_map(|name| var.attribute(name).and_then(|attr| attr.values.get(0)));

        let sentinel = explicit.or_else(|| match var.nc_type? {
            NcType::Byte | NcType::Char | NcType::UByte => None,
            other => Some(other.default_fill()),
        });

        Self { sentinel }
    }

    pub fn is_missing(&self, scalar: NcScalar) -> bool {
        let is_nan = match scalar {
            NcScalar::Float(v) => v.is_nan(),
            NcScalar::Double(v) => v.is_nan(),
            _ => false,
        };
        if is_nan {
            return true;
        }
        match self.sentinel {
            Some(sentinel) => scalar == sentinel || scalar.as_f64() == sentinel.as_f64(),
            None => false,
        }
    }

    /// Wrap an element, masking it when it matches the sentinel.
    pub fn apply(&self, scalar: NcScalar) -> NativeValue {
        if self.is_missing(scalar) {
            NativeValue::Masked
        } else {
            NativeValue::Scalar(scalar)
        }
    }
}

/// Native elements of `values[range]`. Char buffers stay one char run.
pub fn native_elements(
    values: &NcValues,
    range: std::ops::Range<usize>,
    rule: &MissingRule,
) -> Option<NativeValue> {
    let slice = values.slice(range)?;
    if let Some(chars) = slice.as_chars() {
        return Some(NativeValue::Chars(chars.to_vec()));
    }
    Some(NativeValue::Array(
        (0..slice.len())
            .filter_map(|i| slice.get(i))
            .map(|scalar| rule.apply(scalar))
            .collect(),
    ))
}

/// Attribute values are never masked.
pub fn attribute_native(values: &NcValues) -> NativeValue {
    native_elements(values, 0..values.len(), &MissingRule::none())
        .unwrap_or(NativeValue::Array(Vec::new()))
}

/// Normalize a native value, collapsing one-element arrays.
pub fn normalize(native: &NativeValue) -> WodResult<Value> {
    match native {
        NativeValue::Masked => Ok(Value::Null),
        NativeValue::Scalar(scalar) => normalize_scalar(*scalar),
        NativeValue::Chars(bytes) => Ok(Value::Text(decode_chars(bytes))),
        NativeValue::Array(items) if items.len() == 1 => normalize(&items[0]),
        NativeValue::Array(items) => items
            .iter()
            .map(normalize)
            .collect::<WodResult<Vec<_>>>()
            .map(Value::Sequence),
    }
}

/// Normalize an array without the one-element collapse; packed
/// observation slices are always sequences.
pub fn normalize_sequence(native: &NativeValue) -> WodResult<Value> {
    match native {
        NativeValue::Array(items) => items
            .iter()
            .map(normalize)
            .collect::<WodResult<Vec<_>>>()
            .map(Value::Sequence),
        other => normalize(other),
    }
}

fn normalize_scalar(scalar: NcScalar) -> WodResult<Value> {
    Ok(match scalar {
        NcScalar::Byte(v) => Value::Integer(v as i64),
        NcScalar::Short(v) => Value::Integer(v as i64),
        NcScalar::Int(v) => Value::Integer(v as i64),
        NcScalar::UByte(v) => Value::Integer(v as i64),
        NcScalar::UShort(v) => Value::Integer(v as i64),
        NcScalar::UInt(v) => Value::Integer(v as i64),
        NcScalar::Int64(v) => Value::Integer(v),
        NcScalar::UInt64(v) => Value::Integer(i64::try_from(v).map_err(|_| {
            WodError::UnsupportedValueKind(format!(
                "uint64 value {} exceeds the signed 64-bit range",
                v
            ))
        })?),
        NcScalar::Float(v) if v.is_nan() => Value::Null,
        NcScalar::Float(v) => Value::Float(widen_f32(v)),
        NcScalar::Double(v) if v.is_nan() => Value::Null,
        NcScalar::Double(v) => Value::Float(v),
        NcScalar::Char(c) => Value::Text(decode_chars(&[c])),
    })
}

/// Widen through the shortest decimal form so 25.3f32 reads back as 25.3.
fn widen_f32(v: f32) -> f64 {
    if !v.is_finite() {
        return v as f64;
    }
    v.to_string().parse().unwrap_or(v as f64)
}

fn decode_chars(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{fill, Attribute};

    fn float_var(attributes: Vec<Attribute>) -> VariableInfo {
        VariableInfo {
            name: "Temperature".into(),
            nc_type: Some(NcType::Float),
            type_name: "float".into(),
            dimensions: vec!["Temperature_obs".into()],
            shape: vec![2],
            attributes,
        }
    }

    #[test]
    fn test_single_element_collapses() {
        let native = NativeValue::Array(vec![NativeValue::Scalar(NcScalar::Int(7))]);
        assert_eq!(normalize(&native).unwrap(), Value::Integer(7));
        assert_eq!(
            normalize_sequence(&native).unwrap(),
            Value::Sequence(vec![Value::Integer(7)])
        );
    }

    #[test]
    fn test_chars_trimmed() {
        let native = NativeValue::Chars(b"JAPAN   \0\0".to_vec());
        assert_eq!(normalize(&native).unwrap(), Value::Text("JAPAN".into()));
    }

    #[test]
    fn test_masked_is_null_not_zero() {
        let rule = MissingRule::for_variable(&float_var(vec![Attribute::new(
            FILL_VALUE_ATTR,
            NcValues::Float(vec![-9999.0]),
        )]));
        let values = NcValues::Float(vec![1.5, -9999.0]);
        let native = native_elements(&values, 0..2, &rule).unwrap();
        assert_eq!(
            normalize(&native).unwrap(),
            Value::Sequence(vec![Value::Float(1.5), Value::Null])
        );
    }

    #[test]
    fn test_default_fill_and_nan_masked() {
        let rule = MissingRule::for_variable(&float_var(vec![]));
        assert!(rule.is_missing(NcScalar::Float(fill::FLOAT)));
        assert!(rule.is_missing(NcScalar::Float(f32::NAN)));
        assert!(!rule.is_missing(NcScalar::Float(0.0)));
    }

    #[test]
    fn test_byte_variables_have_no_implicit_sentinel() {
        let mut var = float_var(vec![]);
        var.nc_type = Some(NcType::Byte);
        assert!(!MissingRule::for_variable(&var).is_missing(NcScalar::Byte(fill::BYTE)));
    }

    #[test]
    fn test_missing_value_attribute() {
        let rule = MissingRule::for_variable(&float_var(vec![Attribute::new(
            MISSING_VALUE_ATTR,
            NcValues::Double(vec![-99.0]),
        )]));
        assert!(rule.is_missing(NcScalar::Float(-99.0)));
    }

    #[test]
    fn test_f32_widening_is_shortest() {
        let value = normalize(&NativeValue::Scalar(NcScalar::Float(25.3))).unwrap();
        assert_eq!(value, Value::Float(25.3));
    }

    #[test]
    fn test_unsupported_uint64() {
        let err = normalize(&NativeValue::Scalar(NcScalar::UInt64(u64::MAX))).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedValueKind");
        assert_eq!(
            normalize(&NativeValue::Scalar(NcScalar::UInt64(5))).unwrap(),
            Value::Integer(5)
        );
    }

    #[test]
    fn test_attribute_native_not_masked() {
        let native = attribute_native(&NcValues::Float(vec![fill::FLOAT]));
        assert!(matches!(normalize(&native).unwrap(), Value::Float(_)));
    }
}

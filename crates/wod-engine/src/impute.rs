//! Mean imputation for numeric sequences.

use wod_common::Value;

/// Replace every missing entry (Null or NaN) with the mean of the present
/// numeric entries, or 0 when there are none. Sequences holding anything
/// other than numbers and missing entries are returned unchanged.
pub fn impute(values: Vec<Value>) -> Vec<Value> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in &values {
        match value {
            Value::Null => {}
            Value::Float(v) if v.is_nan() => {}
            Value::Integer(_) | Value::Float(_) => {
                sum += value.as_f64().unwrap_or(0.0);
                count += 1;
            }
            _ => return values,
        }
    }

    let fill = if count == 0 { 0.0 } else { sum / count as f64 };
    values
        .into_iter()
        .map(|value| if is_missing(&value) { Value::Float(fill) } else { value })
        .collect()
}

/// [`impute`] applied to a `Sequence`; other values pass through.
pub fn impute_value(value: Value) -> Value {
    match value {
        Value::Sequence(items) => Value::Sequence(impute(items)),
        other => other,
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Float(v) => v.is_nan(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_fill() {
        let out = impute(vec![Value::Float(1.0), Value::Null, Value::Integer(3)]);
        assert_eq!(
            out,
            vec![Value::Float(1.0), Value::Float(2.0), Value::Integer(3)]
        );
    }

    #[test]
    fn test_all_missing_is_zero() {
        let out = impute(vec![Value::Null, Value::Float(f64::NAN)]);
        assert_eq!(out, vec![Value::Float(0.0), Value::Float(0.0)]);
    }

    #[test]
    fn test_idempotent() {
        let inputs = vec![
            vec![Value::Float(2.5), Value::Null, Value::Null, Value::Float(7.5)],
            vec![Value::Null],
            vec![],
            vec![Value::Integer(4), Value::Integer(5)],
        ];
        for input in inputs {
            let once = impute(input);
            assert_eq!(impute(once.clone()), once);
        }
    }

    #[test]
    fn test_non_numeric_unchanged() {
        let input = vec![Value::Text("---x".into()), Value::Null];
        assert_eq!(impute(input.clone()), input);
    }

    #[test]
    fn test_impute_value_passes_scalars() {
        assert_eq!(impute_value(Value::Integer(1)), Value::Integer(1));
        assert_eq!(
            impute_value(Value::Sequence(vec![Value::Null])),
            Value::Sequence(vec![Value::Float(0.0)])
        );
    }
}

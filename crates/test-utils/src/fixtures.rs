//! Common fixtures for cast conversion tests.
//!
//! Documents and text files here represent the shapes that show up in
//! real WOD exports, scaled down to a few casts.

use wod_common::{Cast, Document, InvestigatorInfo, Value};

/// Builds a cast from `(field, value)` pairs.
pub fn cast_of(fields: Vec<(&str, Value)>) -> Cast {
    fields.into_iter().collect()
}

/// Two casts, each contributing one Temperature sample.
pub fn two_cast_temperature_document() -> Document {
    Document {
        casts: vec![
            cast_of(vec![
                ("Temperature", Value::from(vec![10.0])),
                ("Temperature_row_size", Value::Integer(1)),
            ]),
            cast_of(vec![
                ("Temperature", Value::from(vec![11.0])),
                ("Temperature_row_size", Value::Integer(1)),
            ]),
        ],
        ..Document::default()
    }
}

/// Three XBT casts with ragged depth and temperature profiles, per-cast
/// text and integer metadata, flags and investigators.
///
/// The middle cast has no samples at all.
pub fn xbt_document() -> Document {
    let mut document = Document::default();
    document
        .global_attributes
        .insert("title".to_string(), Value::from("WOD XBT sample"));
    document
        .global_attributes
        .insert("cdm_data_type".to_string(), Value::from("XBT"));

    document.casts = vec![
        cast_of(vec![
            ("wod_unique_cast", Value::Integer(10_234_501)),
            ("country", Value::from("UNITED STATES")),
            ("Platform", Value::from("ALBATROSS IV (R/V;call sign KCEJ)")),
            ("lat", Value::Float(41.25)),
            ("lon", Value::Float(-69.5)),
            ("z", Value::from(vec![0.0, 10.0, 20.0])),
            ("z_row_size", Value::Integer(3)),
            ("Temperature", Value::from(vec![18.25, 17.5, 12.125])),
            ("Temperature_row_size", Value::Integer(3)),
            ("Temperature_WODflag", Value::from(vec![0, 0, 2])),
        ]),
        cast_of(vec![
            ("wod_unique_cast", Value::Integer(10_234_502)),
            ("country", Value::from("CANADA")),
            ("Platform", Value::from("HUDSON (CCGS)")),
            ("lat", Value::Float(43.0)),
            ("lon", Value::Float(-65.75)),
            ("z_row_size", Value::Integer(0)),
            ("Temperature_row_size", Value::Integer(0)),
        ]),
        cast_of(vec![
            ("wod_unique_cast", Value::Integer(10_234_503)),
            ("country", Value::from("UNITED STATES")),
            ("Platform", Value::from("DELAWARE II (R/V)")),
            ("lat", Value::Float(40.5)),
            ("lon", Value::Float(-70.0)),
            ("z", Value::from(vec![0.0, 5.0])),
            ("z_row_size", Value::Integer(2)),
            ("Temperature", Value::from(vec![21.0, 20.5])),
            ("Temperature_row_size", Value::Integer(2)),
            ("Temperature_WODflag", Value::from(vec![0, 0])),
        ]),
    ];

    document.primary_investigator_info = Some(InvestigatorInfo {
        names: vec!["SMITH, JOHN".to_string(), "LEE, ANNA".to_string()],
        variables: vec!["all".to_string(), "Temperature".to_string()],
    });

    document
}

/// One cast with two Temperature samples and no Salinity, next to one that
/// declares Salinity.
pub fn ragged_table_document() -> Document {
    Document {
        casts: vec![
            cast_of(vec![
                ("lat", Value::Float(10.0)),
                ("Temperature", Value::from(vec![1.0, 2.0])),
            ]),
            cast_of(vec![
                ("lat", Value::Float(11.0)),
                ("Salinity", Value::from(vec![35.1])),
            ]),
        ],
        ..Document::default()
    }
}

fn delimiter() -> String {
    format!("#{}", "-".repeat(80))
}

/// One cast declaring `Depth(m)` and `Temperature(C)` with a single row.
pub fn single_cast_text() -> String {
    format!(
        "{d}\n\
         CAST,,12345678,WOD Unique Cast\n\
         NODC Cruise ID,,US-12345\n\
         Latitude,,35.5,decimal degrees\n\
         METADATA\n\
         probe_type,,XBT\n\
         VARIABLES,Depth(m),F,O,Temperature(C),F,O\n\
         UNITS,m,,,degrees C,,\n\
         Prof-Flag,,0,,,0,\n\
         1,1.0,,,25.3,,\n\
         END OF VARIABLES SECTION\n\
         {d}\n",
        d = delimiter()
    )
}

/// Two casts; the second has a missing temperature sample.
pub fn two_cast_text() -> String {
    format!(
        "{d}\n\
         CAST,,1001\n\
         Latitude,,12.5\n\
         VARIABLES,Depth(m),F,O,Temperature(C),F,O\n\
         1,0.0,0,,28.1,0,\n\
         2,10.0,0,,27.9,0,\n\
         END OF VARIABLES SECTION\n\
         {d}\n\
         CAST,,1002\n\
         Latitude,,13.0\n\
         VARIABLES,Depth(m),F,O,Temperature(C),F,O\n\
         1,0.0,0,,---,,\n\
         2,10.0,0,,26.0,0,\n\
         3,20.0,0,,24.0,0,\n\
         END OF VARIABLES SECTION\n\
         {d}\n",
        d = delimiter()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xbt_row_sizes_match_arrays() {
        for cast in xbt_document().casts {
            for field in ["z", "Temperature"] {
                let len = cast
                    .get(field)
                    .and_then(Value::as_sequence)
                    .map(<[Value]>::len)
                    .unwrap_or(0);
                assert_eq!(cast.row_size(field), Some(len));
            }
        }
    }

    #[test]
    fn test_text_fixtures_are_delimited() {
        assert!(single_cast_text().starts_with("#---"));
        assert_eq!(two_cast_text().matches("CAST,,").count(), 2);
    }
}

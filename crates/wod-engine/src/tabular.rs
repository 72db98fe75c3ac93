//! One row per (cast, observation index).

use std::collections::BTreeSet;
use std::io;

use serde::Serialize;
use tracing::{debug, info};
use wod_common::vocab::MISSING_CELL;
use wod_common::{Cast, Document, Value, WodError, WodResult};

/// Flat projection of a document. Cells are scalar values; a cell for a
/// field the cast lacks holds the `---` marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Flatten every cast of `document`.
///
/// Scalar columns come first, then every field holding a sequence on at
/// least one cast; both groups sorted by name. Each cast contributes
/// `max(1, longest sequence)` rows and its scalars repeat on each of them.
pub fn flatten(document: &Document) -> WodResult<Table> {
    if document.casts.is_empty() {
        return Err(WodError::SchemaMismatch(
            "cannot tabulate a document without casts".to_string(),
        ));
    }

    let mut array_fields = BTreeSet::new();
    let mut all_fields = BTreeSet::new();
    for cast in &document.casts {
        for (key, value) in cast.iter() {
            all_fields.insert(key.as_str());
            if value.is_sequence() {
                array_fields.insert(key.as_str());
            }
        }
    }

    let scalar_fields: Vec<&str> = all_fields
        .iter()
        .copied()
        .filter(|key| !array_fields.contains(key))
        .collect();
    let array_fields: Vec<&str> = array_fields.into_iter().collect();

    let mut rows = Vec::new();
    for cast in &document.casts {
        let depth = cast_depth(cast);
        for j in 0..depth {
            let mut row = Vec::with_capacity(scalar_fields.len() + array_fields.len());
            for field in &scalar_fields {
                row.push(cast.get(field).cloned().unwrap_or_else(missing));
            }
            for field in &array_fields {
                let cell = match cast.get(field) {
                    Some(Value::Sequence(items)) => items.get(j).cloned().unwrap_or_else(missing),
                    Some(scalar) => scalar.clone(),
                    None => missing(),
                };
                row.push(cell);
            }
            rows.push(row);
        }
    }

    debug!(
        scalar_columns = scalar_fields.len(),
        array_columns = array_fields.len(),
        "Flattened columns"
    );

    let columns = scalar_fields
        .into_iter()
        .chain(array_fields)
        .map(str::to_string)
        .collect();

    info!(casts = document.casts.len(), rows = rows.len(), "Tabulated document");
    Ok(Table { columns, rows })
}

/// Render `table` as CSV with a header row. Null cells are empty.
pub fn write_csv<W: io::Write>(table: &Table, writer: W) -> WodResult<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&table.columns).map_err(csv_error)?;
    for row in &table.rows {
        out.write_record(row.iter().map(|cell| cell.to_string()))
            .map_err(csv_error)?;
    }
    out.flush()?;
    Ok(())
}

fn cast_depth(cast: &Cast) -> usize {
    cast.iter()
        .filter_map(|(_, value)| value.as_sequence())
        .map(<[Value]>::len)
        .max()
        .unwrap_or(0)
        .max(1)
}

fn missing() -> Value {
    Value::Text(MISSING_CELL.to_string())
}

fn csv_error(err: csv::Error) -> WodError {
    match err.into_kind() {
        csv::ErrorKind::Io(err) => WodError::Io(err),
        other => WodError::ValidationError(format!("csv output failed: {:?}", other)),
    }
}

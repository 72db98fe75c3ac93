//! Builders for WOD-layout binary containers.
//!
//! The produced files follow the ragged layout the decoder expects: per-cast
//! variables over `casts`, fixed-width text over `(casts, strnlen*)`, and
//! packed observations over `<field>_obs` addressed by `<field>_row_size`.

use bytes::Bytes;
use netcdf::types::{NcTypeDescriptor, NcVariableType};
use wod_common::vocab::{
    obs_dim, row_size_key, wodflag_key, CASTS_DIM, CLASSIFICATION_ATTR, LONG_TEXT_DIM,
    LONG_TEXT_WIDTH, SHORT_TEXT_DIM, SHORT_TEXT_WIDTH,
};
use wod_common::TextWidth;

use crate::paths::temp_test_dir;

/// Fill used for float variables written by the builder.
pub const BUILDER_FLOAT_FILL: f32 = -9999.0;

const FILL_VALUE_ATTR: &str = "_FillValue";

/// Text element; plain `u8` would be stored as `NC_UBYTE`.
#[repr(transparent)]
#[derive(Clone, Copy)]
struct NcChar(u8);

unsafe impl NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

struct Packed {
    field: String,
    rows: Vec<Vec<f32>>,
    flags: Option<Vec<Vec<i8>>>,
}

/// Assembles a small cast file in memory.
///
/// # Example
///
/// ```
/// use test_utils::CastFileBuilder;
///
/// let bytes = CastFileBuilder::new(2)
///     .float_var("lat", &[35.5, -12.0])
///     .observations("Temperature", &[&[20.0, 18.0], &[15.0]])
///     .build();
/// assert_eq!(&bytes[..3], b"CDF");
/// ```
pub struct CastFileBuilder {
    casts: usize,
    attributes: Vec<(String, String)>,
    floats: Vec<(String, Vec<f32>)>,
    ints: Vec<(String, Vec<i32>)>,
    texts: Vec<(String, TextWidth, Vec<String>)>,
    packed: Vec<Packed>,
}

impl CastFileBuilder {
    pub fn new(casts: usize) -> Self {
        Self {
            casts,
            attributes: Vec::new(),
            floats: Vec::new(),
            ints: Vec::new(),
            texts: Vec::new(),
            packed: Vec::new(),
        }
    }

    /// Text global attribute.
    pub fn attribute(mut self, name: &str, text: &str) -> Self {
        self.attributes.push((name.to_string(), text.to_string()));
        self
    }

    /// Sets the `cdm_data_type` classification attribute.
    pub fn classification(self, code: &str) -> Self {
        self.attribute(CLASSIFICATION_ATTR, code)
    }

    /// Per-cast float; `BUILDER_FLOAT_FILL` entries read back as missing.
    pub fn float_var(mut self, name: &str, values: &[f32]) -> Self {
        self.floats.push((name.to_string(), values.to_vec()));
        self
    }

    pub fn int_var(mut self, name: &str, values: &[i32]) -> Self {
        self.ints.push((name.to_string(), values.to_vec()));
        self
    }

    pub fn text_var(mut self, name: &str, width: TextWidth, values: &[&str]) -> Self {
        self.texts.push((
            name.to_string(),
            width,
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    /// Packed observation field, one slice per cast.
    pub fn observations(mut self, field: &str, rows: &[&[f32]]) -> Self {
        self.packed.push(Packed {
            field: field.to_string(),
            rows: rows.iter().map(|r| r.to_vec()).collect(),
            flags: None,
        });
        self
    }

    /// `<field>_WODflag` slices for a field added with [`observations`](Self::observations).
    pub fn flags(mut self, field: &str, rows: &[&[i8]]) -> Self {
        if let Some(packed) = self.packed.iter_mut().find(|p| p.field == field) {
            packed.flags = Some(rows.iter().map(|r| r.to_vec()).collect());
        }
        self
    }

    /// Write a classic container and return its bytes.
    pub fn build(self) -> Bytes {
        let dir = temp_test_dir();
        let path = dir.path().join("casts.nc");
        let mut file =
            netcdf::create_with(&path, netcdf::Options::empty()).expect("create container");

        file.add_dimension(CASTS_DIM, self.casts).expect("casts dimension");
        file.add_dimension(LONG_TEXT_DIM, LONG_TEXT_WIDTH)
            .expect("long text dimension");
        file.add_dimension(SHORT_TEXT_DIM, SHORT_TEXT_WIDTH)
            .expect("short text dimension");
        for (name, text) in &self.attributes {
            file.add_attribute(name, text.as_str()).expect("global attribute");
        }

        // Define mode: every dimension and variable before any data.
        for (name, _) in &self.floats {
            file.add_variable::<f32>(name, &[CASTS_DIM])
                .expect("float variable")
                .put_attribute(FILL_VALUE_ATTR, BUILDER_FLOAT_FILL)
                .expect("float fill");
        }
        for (name, _) in &self.ints {
            file.add_variable::<i32>(name, &[CASTS_DIM])
                .expect("int variable");
        }
        for (name, width, _) in &self.texts {
            file.add_variable_with_type(name, &[CASTS_DIM, width.dimension()], &NcVariableType::Char)
                .expect("text variable");
        }
        for packed in &self.packed {
            file.add_variable::<i32>(&row_size_key(&packed.field), &[CASTS_DIM])
                .expect("row size variable");
            let total: usize = packed.rows.iter().map(Vec::len).sum();
            if total == 0 {
                continue;
            }
            let dim = obs_dim(&packed.field);
            file.add_dimension(&dim, total).expect("obs dimension");
            file.add_variable::<f32>(&packed.field, &[dim.as_str()])
                .expect("packed variable")
                .put_attribute(FILL_VALUE_ATTR, BUILDER_FLOAT_FILL)
                .expect("packed fill");
            if packed.flags.is_some() {
                file.add_variable::<i8>(&wodflag_key(&packed.field), &[dim.as_str()])
                    .expect("flag variable");
            }
        }
        file.enddef().expect("leave define mode");

        for (name, values) in &self.floats {
            put(&mut file, name, values);
        }
        for (name, values) in &self.ints {
            put(&mut file, name, values);
        }
        for (name, width, values) in &self.texts {
            let mut chars = vec![NcChar(0); self.casts * width.width()];
            for (i, value) in values.iter().enumerate() {
                let mut text = value.as_bytes().to_vec();
                text.resize(width.width(), b' ');
                for (j, byte) in text.into_iter().enumerate() {
                    chars[i * width.width() + j] = NcChar(byte);
                }
            }
            put(&mut file, name, &chars);
        }
        for packed in &self.packed {
            let row_sizes: Vec<i32> = packed.rows.iter().map(|r| r.len() as i32).collect();
            put(&mut file, &row_size_key(&packed.field), &row_sizes);

            let values: Vec<f32> = packed.rows.concat();
            if values.is_empty() {
                continue;
            }
            put(&mut file, &packed.field, &values);
            if let Some(flags) = &packed.flags {
                put(&mut file, &wodflag_key(&packed.field), &flags.concat());
            }
        }

        file.close().expect("close container");
        Bytes::from(std::fs::read(&path).expect("container bytes"))
    }
}

fn put<T: NcTypeDescriptor>(file: &mut netcdf::FileMut, name: &str, values: &[T]) {
    file.variable_mut(name)
        .expect("declared variable")
        .put_values(values, ..)
        .expect("variable values");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::write_test_file;

    #[test]
    fn test_builds_ragged_layout() {
        let bytes = CastFileBuilder::new(2)
            .observations("z", &[&[0.0, 10.0], &[0.0]])
            .flags("z", &[&[0, 0], &[2]])
            .text_var("country", TextWidth::Short, &["JAPAN", "PERU"])
            .classification("XBT")
            .build();
        assert_eq!(&bytes[..4], b"CDF\x01");

        let dir = temp_test_dir();
        let path = write_test_file(dir.path(), "ragged.nc", &bytes);
        let file = netcdf::open(&path).unwrap();
        assert_eq!(file.dimension("z_obs").unwrap().len(), 3);
        assert_eq!(
            file.variable("z_row_size").unwrap().get_values::<i32, _>(..).unwrap(),
            vec![2, 1]
        );
        assert_eq!(
            file.variable("z_WODflag").unwrap().get_values::<i8, _>(..).unwrap(),
            vec![0, 0, 2]
        );

        let country = file.variable("country").unwrap();
        let shape: Vec<usize> = country.dimensions().iter().map(|d| d.len()).collect();
        assert_eq!(shape, vec![2, 40]);
        let chars = country.get_raw_values(..).unwrap();
        assert_eq!(&chars[40..44], b"PERU");
    }
}

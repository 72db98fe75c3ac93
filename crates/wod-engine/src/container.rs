//! Container access through the netCDF library.
//!
//! [`Container`] loads the header of a file once (dimensions, attributes and
//! variable metadata) and reads variable data on demand into typed,
//! flattened [`NcValues`] buffers. [`ContainerWriter`] stages a fixed-size
//! layout in memory and serializes it as a classic file, switching to the
//! 64-bit offset variant when the data outgrows 32-bit offsets.
//!
//! The library only opens paths, so in-memory input is staged in a
//! temporary file, on `/dev/shm` when it exists.

use std::fmt;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use netcdf::types::{FloatType, IntType, NcTypeDescriptor, NcVariableType};
use netcdf::AttributeValue;
use tempfile::NamedTempFile;
use tracing::debug;
use wod_common::{WodError, WodResult};

use crate::error::container_error;

/// Attribute holding a variable's fill (missing) value.
pub const FILL_VALUE_ATTR: &str = "_FillValue";

/// Alternative missing-value attribute used by older producers.
pub const MISSING_VALUE_ATTR: &str = "missing_value";

/// Largest fixed-size variable the 64-bit offset format can hold.
pub const MAX_VARIABLE_BYTES: usize = u32::MAX as usize - 3;

/// Data size past which the classic format runs out of offsets.
const CLASSIC_DATA_LIMIT: usize = i32::MAX as usize;

const HDF5_MAGIC: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// Default fill values the library applies when a variable has no `_FillValue`.
pub mod fill {
    pub const BYTE: i8 = -127;
    pub const CHAR: u8 = 0;
    pub const SHORT: i16 = -32767;
    pub const INT: i32 = -2_147_483_647;
    pub const FLOAT: f32 = 9.969_209_968_386_869e36;
    pub const DOUBLE: f64 = 9.969_209_968_386_869e36;
    pub const UBYTE: u8 = 255;
    pub const USHORT: u16 = 65535;
    pub const UINT: u32 = 4_294_967_295;
    pub const INT64: i64 = -9_223_372_036_854_775_806;
    pub const UINT64: u64 = 18_446_744_073_709_551_614;
}

/// On-disk flavour, sniffed from the leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `CDF\x01`
    Classic,
    /// `CDF\x02`
    Offset64,
    /// `CDF\x05`
    Data64,
    /// HDF5-based netCDF-4
    Hdf5,
}

impl Format {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(HDF5_MAGIC) {
            return Some(Format::Hdf5);
        }
        match bytes {
            [b'C', b'D', b'F', 1, ..] => Some(Format::Classic),
            [b'C', b'D', b'F', 2, ..] => Some(Format::Offset64),
            [b'C', b'D', b'F', 5, ..] => Some(Format::Data64),
            _ => None,
        }
    }
}

/// Atomic element type of an attribute or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NcType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
    UByte,
    UShort,
    UInt,
    Int64,
    UInt64,
}

impl NcType {
    /// `None` for user-defined and string types.
    pub fn from_descriptor(descriptor: &NcVariableType) -> Option<Self> {
        Some(match descriptor {
            NcVariableType::Char => NcType::Char,
            NcVariableType::Int(IntType::I8) => NcType::Byte,
            NcVariableType::Int(IntType::I16) => NcType::Short,
            NcVariableType::Int(IntType::I32) => NcType::Int,
            NcVariableType::Int(IntType::I64) => NcType::Int64,
            NcVariableType::Int(IntType::U8) => NcType::UByte,
            NcVariableType::Int(IntType::U16) => NcType::UShort,
            NcVariableType::Int(IntType::U32) => NcType::UInt,
            NcVariableType::Int(IntType::U64) => NcType::UInt64,
            NcVariableType::Float(FloatType::F32) => NcType::Float,
            NcVariableType::Float(FloatType::F64) => NcType::Double,
            _ => return None,
        })
    }

    pub fn descriptor(self) -> NcVariableType {
        match self {
            NcType::Char => NcVariableType::Char,
            NcType::Byte => NcVariableType::Int(IntType::I8),
            NcType::Short => NcVariableType::Int(IntType::I16),
            NcType::Int => NcVariableType::Int(IntType::I32),
            NcType::Int64 => NcVariableType::Int(IntType::I64),
            NcType::UByte => NcVariableType::Int(IntType::U8),
            NcType::UShort => NcVariableType::Int(IntType::U16),
            NcType::UInt => NcVariableType::Int(IntType::U32),
            NcType::UInt64 => NcVariableType::Int(IntType::U64),
            NcType::Float => NcVariableType::Float(FloatType::F32),
            NcType::Double => NcVariableType::Float(FloatType::F64),
        }
    }

    /// Size in bytes of a single element
    pub fn element_size(self) -> usize {
        match self {
            NcType::Byte | NcType::Char | NcType::UByte => 1,
            NcType::Short | NcType::UShort => 2,
            NcType::Int | NcType::Float | NcType::UInt => 4,
            NcType::Double | NcType::Int64 | NcType::UInt64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NcType::Byte => "byte",
            NcType::Char => "char",
            NcType::Short => "short",
            NcType::Int => "int",
            NcType::Float => "float",
            NcType::Double => "double",
            NcType::UByte => "ubyte",
            NcType::UShort => "ushort",
            NcType::UInt => "uint",
            NcType::Int64 => "int64",
            NcType::UInt64 => "uint64",
        }
    }

    pub fn default_fill(self) -> NcScalar {
        match self {
            NcType::Byte => NcScalar::Byte(fill::BYTE),
            NcType::Char => NcScalar::Char(fill::CHAR),
            NcType::Short => NcScalar::Short(fill::SHORT),
            NcType::Int => NcScalar::Int(fill::INT),
            NcType::Float => NcScalar::Float(fill::FLOAT),
            NcType::Double => NcScalar::Double(fill::DOUBLE),
            NcType::UByte => NcScalar::UByte(fill::UBYTE),
            NcType::UShort => NcScalar::UShort(fill::USHORT),
            NcType::UInt => NcScalar::UInt(fill::UINT),
            NcType::Int64 => NcScalar::Int64(fill::INT64),
            NcType::UInt64 => NcScalar::UInt64(fill::UINT64),
        }
    }
}

fn type_name(descriptor: &NcVariableType) -> String {
    match NcType::from_descriptor(descriptor) {
        Some(nc_type) => nc_type.name().to_string(),
        None => match descriptor {
            NcVariableType::String => "string".to_string(),
            NcVariableType::Compound(_) => "compound".to_string(),
            NcVariableType::Opaque(_) => "opaque".to_string(),
            NcVariableType::Enum(_) => "enum".to_string(),
            _ => "vlen".to_string(),
        },
    }
}

/// A single element of any atomic type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NcScalar {
    Byte(i8),
    Char(u8),
    Short(i16),
    Int(i32),
    Float(f32),
    Double(f64),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    Int64(i64),
    UInt64(u64),
}

impl NcScalar {
    pub fn nc_type(&self) -> NcType {
        match self {
            NcScalar::Byte(_) => NcType::Byte,
            NcScalar::Char(_) => NcType::Char,
            NcScalar::Short(_) => NcType::Short,
            NcScalar::Int(_) => NcType::Int,
            NcScalar::Float(_) => NcType::Float,
            NcScalar::Double(_) => NcType::Double,
            NcScalar::UByte(_) => NcType::UByte,
            NcScalar::UShort(_) => NcType::UShort,
            NcScalar::UInt(_) => NcType::UInt,
            NcScalar::Int64(_) => NcType::Int64,
            NcScalar::UInt64(_) => NcType::UInt64,
        }
    }

    /// Numeric view used for sentinel comparisons. Chars map to their byte value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            NcScalar::Byte(v) => v as f64,
            NcScalar::Char(v) => v as f64,
            NcScalar::Short(v) => v as f64,
            NcScalar::Int(v) => v as f64,
            NcScalar::Float(v) => v as f64,
            NcScalar::Double(v) => v,
            NcScalar::UByte(v) => v as f64,
            NcScalar::UShort(v) => v as f64,
            NcScalar::UInt(v) => v as f64,
            NcScalar::Int64(v) => v as f64,
            NcScalar::UInt64(v) => v as f64,
        }
    }
}

/// Typed, flattened (row-major) element buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum NcValues {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    UByte(Vec<u8>),
    UShort(Vec<u16>),
    UInt(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
}

/// Evaluate `$body` against the inner vector of any variant.
macro_rules! with_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            NcValues::Byte($v) => $body,
            NcValues::Char($v) => $body,
            NcValues::Short($v) => $body,
            NcValues::Int($v) => $body,
            NcValues::Float($v) => $body,
            NcValues::Double($v) => $body,
            NcValues::UByte($v) => $body,
            NcValues::UShort($v) => $body,
            NcValues::UInt($v) => $body,
            NcValues::Int64($v) => $body,
            NcValues::UInt64($v) => $body,
        }
    };
}

/// Like `with_values!`, re-wrapping the result in the same variant.
macro_rules! map_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            NcValues::Byte($v) => NcValues::Byte($body),
            NcValues::Char($v) => NcValues::Char($body),
            NcValues::Short($v) => NcValues::Short($body),
            NcValues::Int($v) => NcValues::Int($body),
            NcValues::Float($v) => NcValues::Float($body),
            NcValues::Double($v) => NcValues::Double($body),
            NcValues::UByte($v) => NcValues::UByte($body),
            NcValues::UShort($v) => NcValues::UShort($body),
            NcValues::UInt($v) => NcValues::UInt($body),
            NcValues::Int64($v) => NcValues::Int64($body),
            NcValues::UInt64($v) => NcValues::UInt64($body),
        }
    };
}

impl NcValues {
    pub fn nc_type(&self) -> NcType {
        match self {
            NcValues::Byte(_) => NcType::Byte,
            NcValues::Char(_) => NcType::Char,
            NcValues::Short(_) => NcType::Short,
            NcValues::Int(_) => NcType::Int,
            NcValues::Float(_) => NcType::Float,
            NcValues::Double(_) => NcType::Double,
            NcValues::UByte(_) => NcType::UByte,
            NcValues::UShort(_) => NcType::UShort,
            NcValues::UInt(_) => NcType::UInt,
            NcValues::Int64(_) => NcType::Int64,
            NcValues::UInt64(_) => NcType::UInt64,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A buffer of `len` copies of `fill`.
    pub fn filled(len: usize, fill: NcScalar) -> Self {
        match fill {
            NcScalar::Byte(x) => NcValues::Byte(vec![x; len]),
            NcScalar::Char(x) => NcValues::Char(vec![x; len]),
            NcScalar::Short(x) => NcValues::Short(vec![x; len]),
            NcScalar::Int(x) => NcValues::Int(vec![x; len]),
            NcScalar::Float(x) => NcValues::Float(vec![x; len]),
            NcScalar::Double(x) => NcValues::Double(vec![x; len]),
            NcScalar::UByte(x) => NcValues::UByte(vec![x; len]),
            NcScalar::UShort(x) => NcValues::UShort(vec![x; len]),
            NcScalar::UInt(x) => NcValues::UInt(vec![x; len]),
            NcScalar::Int64(x) => NcValues::Int64(vec![x; len]),
            NcScalar::UInt64(x) => NcValues::UInt64(vec![x; len]),
        }
    }

    pub fn get(&self, index: usize) -> Option<NcScalar> {
        match self {
            NcValues::Byte(v) => v.get(index).map(|&x| NcScalar::Byte(x)),
            NcValues::Char(v) => v.get(index).map(|&x| NcScalar::Char(x)),
            NcValues::Short(v) => v.get(index).map(|&x| NcScalar::Short(x)),
            NcValues::Int(v) => v.get(index).map(|&x| NcScalar::Int(x)),
            NcValues::Float(v) => v.get(index).map(|&x| NcScalar::Float(x)),
            NcValues::Double(v) => v.get(index).map(|&x| NcScalar::Double(x)),
            NcValues::UByte(v) => v.get(index).map(|&x| NcScalar::UByte(x)),
            NcValues::UShort(v) => v.get(index).map(|&x| NcScalar::UShort(x)),
            NcValues::UInt(v) => v.get(index).map(|&x| NcScalar::UInt(x)),
            NcValues::Int64(v) => v.get(index).map(|&x| NcScalar::Int64(x)),
            NcValues::UInt64(v) => v.get(index).map(|&x| NcScalar::UInt64(x)),
        }
    }

    /// Copy out `range`, or `None` when it is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Option<NcValues> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        Some(map_values!(self, v => v[range.clone()].to_vec()))
    }

    /// Raw bytes of a char buffer.
    pub fn as_chars(&self) -> Option<&[u8]> {
        match self {
            NcValues::Char(v) => Some(v),
            _ => None,
        }
    }

    /// Overwrite `src.len()` elements starting at `start`. Returns false on a
    /// type mismatch or when the write would run past the end.
    fn copy_from(&mut self, start: usize, src: &NcValues) -> bool {
        fn copy<T: Copy>(dst: &mut [T], start: usize, src: &[T]) -> bool {
            match start.checked_add(src.len()) {
                Some(end) if end <= dst.len() => {
                    dst[start..end].copy_from_slice(src);
                    true
                }
                _ => false,
            }
        }

        match (self, src) {
            (NcValues::Byte(d), NcValues::Byte(s)) => copy(d, start, s),
            (NcValues::Char(d), NcValues::Char(s)) => copy(d, start, s),
            (NcValues::Short(d), NcValues::Short(s)) => copy(d, start, s),
            (NcValues::Int(d), NcValues::Int(s)) => copy(d, start, s),
            (NcValues::Float(d), NcValues::Float(s)) => copy(d, start, s),
            (NcValues::Double(d), NcValues::Double(s)) => copy(d, start, s),
            (NcValues::UByte(d), NcValues::UByte(s)) => copy(d, start, s),
            (NcValues::UShort(d), NcValues::UShort(s)) => copy(d, start, s),
            (NcValues::UInt(d), NcValues::UInt(s)) => copy(d, start, s),
            (NcValues::Int64(d), NcValues::Int64(s)) => copy(d, start, s),
            (NcValues::UInt64(d), NcValues::UInt64(s)) => copy(d, start, s),
            _ => false,
        }
    }

    /// Library form of attribute values. Char buffers become text.
    fn to_attribute_value(&self) -> AttributeValue {
        match self {
            NcValues::Byte(v) => AttributeValue::Schars(v.clone()),
            NcValues::Char(v) => AttributeValue::Str(String::from_utf8_lossy(v).into_owned()),
            NcValues::Short(v) => AttributeValue::Shorts(v.clone()),
            NcValues::Int(v) => AttributeValue::Ints(v.clone()),
            NcValues::Float(v) => AttributeValue::Floats(v.clone()),
            NcValues::Double(v) => AttributeValue::Doubles(v.clone()),
            NcValues::UByte(v) => AttributeValue::Uchars(v.clone()),
            NcValues::UShort(v) => AttributeValue::Ushorts(v.clone()),
            NcValues::UInt(v) => AttributeValue::Uints(v.clone()),
            NcValues::Int64(v) => AttributeValue::Longlongs(v.clone()),
            NcValues::UInt64(v) => AttributeValue::Ulonglongs(v.clone()),
        }
    }

    /// `None` for string arrays, which have no flat element form.
    fn from_attribute_value(value: AttributeValue) -> Option<Self> {
        Some(match value {
            AttributeValue::Schar(v) => NcValues::Byte(vec![v]),
            AttributeValue::Schars(v) => NcValues::Byte(v),
            AttributeValue::Str(s) => NcValues::Char(s.into_bytes()),
            AttributeValue::Short(v) => NcValues::Short(vec![v]),
            AttributeValue::Shorts(v) => NcValues::Short(v),
            AttributeValue::Int(v) => NcValues::Int(vec![v]),
            AttributeValue::Ints(v) => NcValues::Int(v),
            AttributeValue::Float(v) => NcValues::Float(vec![v]),
            AttributeValue::Floats(v) => NcValues::Float(v),
            AttributeValue::Double(v) => NcValues::Double(vec![v]),
            AttributeValue::Doubles(v) => NcValues::Double(v),
            AttributeValue::Uchar(v) => NcValues::UByte(vec![v]),
            AttributeValue::Uchars(v) => NcValues::UByte(v),
            AttributeValue::Ushort(v) => NcValues::UShort(vec![v]),
            AttributeValue::Ushorts(v) => NcValues::UShort(v),
            AttributeValue::Uint(v) => NcValues::UInt(vec![v]),
            AttributeValue::Uints(v) => NcValues::UInt(v),
            AttributeValue::Longlong(v) => NcValues::Int64(vec![v]),
            AttributeValue::Longlongs(v) => NcValues::Int64(v),
            AttributeValue::Ulonglong(v) => NcValues::UInt64(vec![v]),
            AttributeValue::Ulonglongs(v) => NcValues::UInt64(v),
            AttributeValue::Strs(_) => return None,
        })
    }
}

/// Element type the library writes as `NC_CHAR`; `u8` would be written as `NC_UBYTE`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
struct NcChar(u8);

unsafe impl NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

/// A named dimension with its current length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionInfo {
    pub name: String,
    pub len: usize,
    pub unlimited: bool,
}

/// A global or per-variable attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: NcValues,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: NcValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Char attribute holding `text`.
    pub fn text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, NcValues::Char(text.as_bytes().to_vec()))
    }

    /// Text content of a char attribute, NUL padding removed.
    pub fn as_text(&self) -> Option<String> {
        self.values
            .as_chars()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
    }
}

/// Header record of a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    /// `None` when the element type has no flat representation.
    pub nc_type: Option<NcType>,
    pub type_name: String,
    /// Dimension names, outermost first.
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub attributes: Vec<Attribute>,
}

impl VariableInfo {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Element count, `None` when it does not fit in memory.
    pub fn len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &len| acc.checked_mul(len))
    }
}

/// An open container with its header loaded.
pub struct Container {
    format: Format,
    dimensions: Vec<DimensionInfo>,
    attributes: Vec<Attribute>,
    variables: Vec<VariableInfo>,
    file: netcdf::File,
    // Dropped after `file` so the library closes its handle first.
    _staged: Option<NamedTempFile>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("format", &self.format)
            .field("dimensions", &self.dimensions)
            .field("variables", &self.variables.len())
            .finish()
    }
}

impl Container {
    /// Open a container held in memory.
    pub fn from_bytes(bytes: &[u8]) -> WodResult<Self> {
        let format = sniff(bytes)?;
        let staged = stage(bytes)?;
        let file = netcdf::open(staged.path()).map_err(container_error)?;
        Self::load(file, format, Some(staged))
    }

    /// Open a container on disk.
    pub fn open(path: impl AsRef<Path>) -> WodResult<Self> {
        let path = path.as_ref();
        let mut magic = Vec::with_capacity(HDF5_MAGIC.len());
        std::fs::File::open(path)?
            .take(HDF5_MAGIC.len() as u64)
            .read_to_end(&mut magic)?;
        let format = sniff(&magic)?;
        let file = netcdf::open(path).map_err(container_error)?;
        Self::load(file, format, None)
    }

    fn load(file: netcdf::File, format: Format, staged: Option<NamedTempFile>) -> WodResult<Self> {
        let dimensions = file
            .dimensions()
            .map(|dim| DimensionInfo {
                name: dim.name(),
                len: dim.len(),
                unlimited: dim.is_unlimited(),
            })
            .collect();
        let attributes = load_attributes(file.attributes())?;
        let variables = file
            .variables()
            .map(|var| -> WodResult<VariableInfo> {
                let descriptor = var.vartype();
                Ok(VariableInfo {
                    name: var.name(),
                    nc_type: NcType::from_descriptor(&descriptor),
                    type_name: type_name(&descriptor),
                    dimensions: var.dimensions().iter().map(|dim| dim.name()).collect(),
                    shape: var.dimensions().iter().map(|dim| dim.len()).collect(),
                    attributes: load_attributes(var.attributes())?,
                })
            })
            .collect::<WodResult<Vec<_>>>()?;

        let container = Self {
            format,
            dimensions,
            attributes,
            variables,
            file,
            _staged: staged,
        };
        debug!(
            format = ?container.format,
            dimensions = container.dimensions.len(),
            variables = container.variables.len(),
            "Loaded container header"
        );
        Ok(container)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn dimensions(&self) -> &[DimensionInfo] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionInfo> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Read every element of a variable in row-major order.
    pub fn read(&self, var: &VariableInfo) -> WodResult<NcValues> {
        let nc_type = var.nc_type.ok_or_else(|| {
            WodError::UnsupportedValueKind(format!(
                "variable '{}' holds {} elements",
                var.name, var.type_name
            ))
        })?;
        let len = var.len().ok_or_else(|| {
            WodError::MalformedContainer(format!("variable '{}' is too large to read", var.name))
        })?;
        // The library rejects zero-length reads.
        if len == 0 {
            return Ok(NcValues::filled(0, nc_type.default_fill()));
        }

        let handle = self.file.variable(&var.name).ok_or_else(|| {
            WodError::MalformedContainer(format!("variable '{}' disappeared", var.name))
        })?;
        let values = match nc_type {
            NcType::Byte => handle.get_values::<i8, _>(..).map(NcValues::Byte),
            NcType::Char => handle.get_raw_values(..).map(NcValues::Char),
            NcType::Short => handle.get_values::<i16, _>(..).map(NcValues::Short),
            NcType::Int => handle.get_values::<i32, _>(..).map(NcValues::Int),
            NcType::Float => handle.get_values::<f32, _>(..).map(NcValues::Float),
            NcType::Double => handle.get_values::<f64, _>(..).map(NcValues::Double),
            NcType::UByte => handle.get_values::<u8, _>(..).map(NcValues::UByte),
            NcType::UShort => handle.get_values::<u16, _>(..).map(NcValues::UShort),
            NcType::UInt => handle.get_values::<u32, _>(..).map(NcValues::UInt),
            NcType::Int64 => handle.get_values::<i64, _>(..).map(NcValues::Int64),
            NcType::UInt64 => handle.get_values::<u64, _>(..).map(NcValues::UInt64),
        }
        .map_err(container_error)?;
        Ok(values)
    }

    /// Read a variable by name.
    pub fn read_by_name(&self, name: &str) -> WodResult<NcValues> {
        let var = self.variable(name).ok_or_else(|| {
            WodError::MalformedContainer(format!("no variable named '{}'", name))
        })?;
        self.read(var)
    }
}

fn sniff(bytes: &[u8]) -> WodResult<Format> {
    Format::sniff(bytes).ok_or_else(|| {
        WodError::MalformedContainer("not a netCDF container (unrecognised magic bytes)".to_string())
    })
}

fn load_attributes<'a>(
    attributes: impl Iterator<Item = netcdf::Attribute<'a>>,
) -> WodResult<Vec<Attribute>> {
    let mut loaded = Vec::new();
    for attr in attributes {
        let value = attr.value().map_err(container_error)?;
        match NcValues::from_attribute_value(value) {
            Some(values) => loaded.push(Attribute::new(attr.name(), values)),
            None => debug!(attribute = attr.name(), "Skipping string-array attribute"),
        }
    }
    Ok(loaded)
}

/// Shared memory when available, otherwise the system temp directory.
fn staging_dir() -> Option<PathBuf> {
    let shm = Path::new("/dev/shm");
    shm.is_dir().then(|| shm.to_path_buf())
}

fn stage(bytes: &[u8]) -> WodResult<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("wod_").suffix(".nc");
    let mut staged = match staging_dir() {
        Some(dir) => builder.tempfile_in(dir).or_else(|_| builder.tempfile())?,
        None => builder.tempfile()?,
    };
    staged.write_all(bytes)?;
    staged.flush()?;
    Ok(staged)
}

struct PendingVariable {
    name: String,
    dimensions: Vec<String>,
    attributes: Vec<Attribute>,
    values: NcValues,
}

/// Whether the library accepts `name` for a dimension, variable or attribute.
pub fn is_valid_name(name: &str) -> bool {
    let valid_start = name
        .chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);
    valid_start
        && !name.contains('/')
        && !name.chars().any(char::is_control)
        && !name.ends_with(char::is_whitespace)
}

fn check_name(name: &str) -> WodResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(WodError::MalformedContainer(format!(
            "'{}' is not a valid container name",
            name
        )))
    }
}

/// In-memory builder for a fixed-size container. Every variable buffer
/// starts out holding its fill value so unwritten cells read back as missing.
#[derive(Default)]
pub struct ContainerWriter {
    dimensions: Vec<(String, usize)>,
    attributes: Vec<Attribute>,
    variables: Vec<PendingVariable>,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fixed-size dimension. Zero would declare an unlimited one.
    pub fn add_dimension(&mut self, name: &str, len: usize) -> WodResult<()> {
        check_name(name)?;
        if len == 0 {
            return Err(WodError::MalformedContainer(format!(
                "dimension '{}' has zero length",
                name
            )));
        }
        if self.dimension_len(name).is_some() {
            return Err(WodError::MalformedContainer(format!(
                "dimension '{}' already defined",
                name
            )));
        }
        self.dimensions.push((name.to_string(), len));
        Ok(())
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .find(|(dim, _)| dim == name)
            .map(|(_, len)| *len)
    }

    /// Set a global attribute, replacing any previous value.
    pub fn add_attribute(&mut self, attribute: Attribute) -> WodResult<()> {
        check_name(&attribute.name)?;
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        Ok(())
    }

    /// Declare a variable over previously added dimensions.
    pub fn add_variable(
        &mut self,
        name: &str,
        nc_type: NcType,
        dims: &[&str],
        attributes: Vec<Attribute>,
    ) -> WodResult<()> {
        check_name(name)?;
        if self.has_variable(name) {
            return Err(WodError::MalformedContainer(format!(
                "variable '{}' already defined",
                name
            )));
        }

        let mut len = 1usize;
        for dim in dims {
            let dim_len = self.dimension_len(dim).ok_or_else(|| {
                WodError::MalformedContainer(format!(
                    "dimension '{}' for variable '{}' is not defined",
                    dim, name
                ))
            })?;
            len = len.checked_mul(dim_len).unwrap_or(usize::MAX);
        }
        let size = len.saturating_mul(nc_type.element_size());
        if size > MAX_VARIABLE_BYTES {
            return Err(WodError::SchemaMismatch(format!(
                "variable '{}' needs {} elements, beyond what a container can hold",
                name, len
            )));
        }

        let fill = attributes
            .iter()
            .find(|a| a.name == FILL_VALUE_ATTR)
            .and_then(|a| a.values.get(0))
            .unwrap_or_else(|| nc_type.default_fill());
        if fill.nc_type() != nc_type {
            return Err(WodError::MalformedContainer(format!(
                "{}:{} is {} but the variable is {}",
                name,
                FILL_VALUE_ATTR,
                fill.nc_type().name(),
                nc_type.name()
            )));
        }

        self.variables.push(PendingVariable {
            name: name.to_string(),
            dimensions: dims.iter().map(|d| d.to_string()).collect(),
            attributes,
            values: NcValues::filled(len, fill),
        });
        Ok(())
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    /// Write `values` into a variable starting at flat element `start`.
    pub fn put(&mut self, name: &str, start: usize, values: &NcValues) -> WodResult<()> {
        let var = self
            .variables
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| {
                WodError::MalformedContainer(format!("variable '{}' is not declared", name))
            })?;

        let expected = var.values.nc_type();
        if expected != values.nc_type() {
            return Err(WodError::MalformedContainer(format!(
                "cannot write {} values into {} variable '{}'",
                values.nc_type().name(),
                expected.name(),
                name
            )));
        }
        let capacity = var.values.len();
        if !var.values.copy_from(start, values) {
            return Err(WodError::MalformedContainer(format!(
                "writing {} values at {} exceeds variable '{}' of {} values",
                values.len(),
                start,
                name,
                capacity
            )));
        }
        Ok(())
    }

    /// Serialize through the library and return the file bytes.
    pub fn finish(self) -> WodResult<Bytes> {
        let data_len = self.variables.iter().fold(0usize, |acc, var| {
            acc.saturating_add(var.values.len() * var.values.nc_type().element_size())
        });
        let options = if data_len > CLASSIC_DATA_LIMIT {
            netcdf::Options::_64BIT_OFFSET
        } else {
            netcdf::Options::empty()
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("wod_out_");
        let dir = match staging_dir() {
            Some(shm) => builder.tempdir_in(shm).or_else(|_| builder.tempdir())?,
            None => builder.tempdir()?,
        };
        let path = dir.path().join("casts.nc");

        let mut file = netcdf::create_with(&path, options).map_err(container_error)?;
        for (name, len) in &self.dimensions {
            file.add_dimension(name, *len).map_err(container_error)?;
        }
        for attr in &self.attributes {
            file.add_attribute(&attr.name, attr.values.to_attribute_value())
                .map_err(container_error)?;
        }
        for var in &self.variables {
            let dims: Vec<&str> = var.dimensions.iter().map(String::as_str).collect();
            let mut handle = file
                .add_variable_with_type(&var.name, &dims, &var.values.nc_type().descriptor())
                .map_err(container_error)?;
            for attr in &var.attributes {
                handle
                    .put_attribute(&attr.name, attr.values.to_attribute_value())
                    .map_err(container_error)?;
            }
        }
        file.enddef().map_err(container_error)?;

        for var in &self.variables {
            let mut handle = file.variable_mut(&var.name).ok_or_else(|| {
                WodError::MalformedContainer(format!("variable '{}' was not created", var.name))
            })?;
            put_all(&mut handle, &var.values).map_err(container_error)?;
        }
        file.close().map_err(container_error)?;

        let bytes = std::fs::read(&path)?;
        debug!(
            bytes = bytes.len(),
            variables = self.variables.len(),
            offset64 = data_len > CLASSIC_DATA_LIMIT,
            "Serialized container"
        );
        Ok(Bytes::from(bytes))
    }
}

fn put_all(handle: &mut netcdf::VariableMut<'_>, values: &NcValues) -> netcdf::Result<()> {
    match values {
        NcValues::Char(v) => {
            let chars: Vec<NcChar> = v.iter().map(|&c| NcChar(c)).collect();
            handle.put_values(&chars, ..)
        }
        NcValues::Byte(v) => handle.put_values(v, ..),
        NcValues::Short(v) => handle.put_values(v, ..),
        NcValues::Int(v) => handle.put_values(v, ..),
        NcValues::Float(v) => handle.put_values(v, ..),
        NcValues::Double(v) => handle.put_values(v, ..),
        NcValues::UByte(v) => handle.put_values(v, ..),
        NcValues::UShort(v) => handle.put_values(v, ..),
        NcValues::UInt(v) => handle.put_values(v, ..),
        NcValues::Int64(v) => handle.put_values(v, ..),
        NcValues::UInt64(v) => handle.put_values(v, ..),
    }
}

//! File-level conversion flows used by the subcommands.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tracing::{info, warn};
use wod_common::{CoercionWarning, Document};
use wod_engine::{
    decode_binary, decode_text, detect_subtype, encode_document, flatten, prepare_document_str,
    write_csv, Container, EngineConfig,
};

/// Kind of cast file on the read side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Binary container (`.nc`)
    Binary,
    /// Legacy WOD text (`.csv`)
    Text,
    /// Document JSON (`.json`)
    Json,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "nc" | "cdf" => Some(InputFormat::Binary),
            "csv" | "txt" => Some(InputFormat::Text),
            "json" => Some(InputFormat::Json),
            _ => None,
        }
    }

    /// An explicit format wins over the file extension.
    pub fn resolve(path: &Path, explicit: Option<Self>) -> Result<Self> {
        explicit.or_else(|| Self::from_path(path)).ok_or_else(|| {
            anyhow!(
                "Cannot tell the format of {:?} from its extension; pass --format",
                path
            )
        })
    }
}

/// Read any supported input into a document.
pub fn read_document(path: &Path, format: InputFormat, config: &EngineConfig) -> Result<Document> {
    let document = match format {
        InputFormat::Binary => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            decode_binary(bytes, config)
                .with_context(|| format!("Failed to decode binary cast file {:?}", path))?
        }
        InputFormat::Text => {
            let text =
                fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            decode_text(&text, config)
                .with_context(|| format!("Failed to decode text cast file {:?}", path))?
        }
        InputFormat::Json => {
            let json =
                fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            Document::from_json_str(&json)
                .with_context(|| format!("Failed to parse document JSON {:?}", path))?
        }
    };
    info!(path = ?path, ?format, casts = document.casts.len(), "Loaded document");
    Ok(document)
}

/// Decode `input` and render it as pretty JSON.
pub fn decode_to_json(input: &Path, format: InputFormat, config: &EngineConfig) -> Result<String> {
    let document = read_document(input, format, config)?;
    document.to_json_pretty().context("Failed to serialize document")
}

/// Outcome of an encode run.
#[derive(Debug, Clone, Serialize)]
pub struct EncodeSummary {
    pub casts: usize,
    pub bytes: usize,
    pub warnings: Vec<CoercionWarning>,
}

/// Prepare interchange JSON from `input` and write a binary container to
/// `output`.
pub fn encode_file(input: &Path, output: &Path, config: &EngineConfig) -> Result<EncodeSummary> {
    let json = fs::read_to_string(input).with_context(|| format!("Failed to read {:?}", input))?;
    let prepared = prepare_document_str(&json)
        .with_context(|| format!("Failed to prepare document from {:?}", input))?;
    let encoded = encode_document(&prepared.document, config).context("Failed to encode document")?;

    fs::write(output, &encoded.bytes).with_context(|| format!("Failed to write {:?}", output))?;

    let mut warnings = prepared.warnings;
    warnings.extend(encoded.warnings);
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "Values were skipped or cleaned while encoding");
    }

    Ok(EncodeSummary {
        casts: prepared.document.casts.len(),
        bytes: encoded.bytes.len(),
        warnings,
    })
}

/// Flatten `input` to CSV on `writer`; returns the number of data rows.
pub fn tabulate<W: Write>(
    input: &Path,
    format: InputFormat,
    config: &EngineConfig,
    writer: W,
) -> Result<usize> {
    let document = read_document(input, format, config)?;
    let table = flatten(&document).context("Failed to tabulate document")?;
    write_csv(&table, writer).context("Failed to write CSV")?;
    Ok(table.rows.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionInfo {
    pub name: String,
    pub len: usize,
    pub unlimited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub element_type: String,
    pub dimensions: Vec<String>,
}

/// Structural summary of a binary container.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub format: String,
    pub subtype: String,
    pub casts: Option<usize>,
    pub attributes: Vec<String>,
    pub dimensions: Vec<DimensionInfo>,
    pub variables: Vec<VariableInfo>,
}

pub fn inspect_file(path: &Path) -> Result<Inspection> {
    let file = Container::open(path).with_context(|| format!("Failed to open {:?}", path))?;

    let dimensions = file
        .dimensions()
        .iter()
        .map(|dim| DimensionInfo {
            name: dim.name.clone(),
            len: dim.len,
            unlimited: dim.unlimited,
        })
        .collect();
    let variables = file
        .variables()
        .iter()
        .map(|var| VariableInfo {
            name: var.name.clone(),
            element_type: var.type_name.clone(),
            dimensions: var.dimensions.clone(),
        })
        .collect();

    Ok(Inspection {
        format: format!("{:?}", file.format()),
        subtype: detect_subtype(&file).to_string(),
        casts: file.dimension("casts").map(|d| d.len),
        attributes: file.attributes().iter().map(|a| a.name.clone()).collect(),
        dimensions,
        variables,
    })
}

/// Write to `path`, or to stdout without one.
pub fn write_output(path: Option<&Path>, contents: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(contents).context("Failed to write to stdout")?;
            stdout.flush().context("Failed to flush stdout")
        }
    }
}

// 📥 Source Collection - descriptors, file discovery, raw CSV frames
//
// Every export format is described by a small TOML descriptor instead of a
// hard-coded parser per bank. A descriptor says which files it owns (regex on
// the file name) and how its columns map onto the canonical ones.

use crate::error::{LedgerError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// How to read one family of export files.
///
/// ```toml
/// pattern = "^nordea_.*\\.csv$"
/// account = "Nordea"
/// delimiter = ";"
/// date_format = "%d.%m.%Y|%Y-%m-%d"
/// day_first = true
///
/// [columns]
/// date = "Kirjauspäivä"
/// amount = "Määrä"
/// description = "Saaja/Maksaja"
/// info = "Viesti"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDescriptor {
    /// Regex matched against the start of the file name
    pub pattern: String,

    /// Account for every row, unless an `account` column is mapped
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// `|`-separated chrono formats, tried in order
    #[serde(default)]
    pub date_format: String,

    #[serde(default)]
    pub day_first: bool,

    /// canonical column -> source column
    #[serde(default)]
    pub columns: BTreeMap<String, String>,

    /// Descriptor file name, filled in on load
    #[serde(skip)]
    pub name: String,

    #[serde(skip)]
    matcher: Option<Regex>,
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl SourceDescriptor {
    /// Parse a descriptor from TOML text. `name` is used in error messages.
    pub fn from_toml(name: &str, text: &str) -> Result<Self> {
        let mut descriptor: SourceDescriptor = toml::from_str(text)?;
        descriptor.name = name.to_string();

        let anchored = format!("^(?:{})", descriptor.pattern);
        let matcher = Regex::new(&anchored)
            .map_err(|e| LedgerError::validation(name, format!("invalid pattern '{}': {}", descriptor.pattern, e)))?;
        descriptor.matcher = Some(matcher);

        if descriptor.delimiter_byte().is_none() {
            return Err(LedgerError::validation(
                name,
                format!("delimiter must be a single byte, got '{}'", descriptor.delimiter),
            ));
        }

        Ok(descriptor)
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(file_name))
    }

    pub fn delimiter_byte(&self) -> Option<u8> {
        match self.delimiter.as_bytes() {
            [byte] => Some(*byte),
            _ => None,
        }
    }

    /// Source column for a canonical name; unmapped names map to themselves
    pub fn source_column<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.columns.get(canonical).map(String::as_str).unwrap_or(canonical)
    }
}

/// Load every `*.toml` descriptor in `folder`, in file name order
pub fn load_descriptors(folder: &Path) -> Result<Vec<SourceDescriptor>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let name = file_name(&path);
        let text = fs::read_to_string(&path)?;
        descriptors.push(SourceDescriptor::from_toml(&name, &text)?);
    }

    debug!("loaded {} source descriptors from {}", descriptors.len(), folder.display());
    Ok(descriptors)
}

// ============================================================================
// FILE COLLECTION
// ============================================================================

/// A source file paired with the descriptor that owns it
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub descriptor: SourceDescriptor,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Pair every file in `folder` with its descriptor.
///
/// Files whose name contains `~` are editor or office lock files and are
/// skipped. The first descriptor whose pattern matches wins; a file no
/// descriptor claims fails the run.
pub fn collect_sources(folder: &Path, descriptors: &[SourceDescriptor]) -> Result<Vec<SourceFile>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut sources = Vec::new();
    for path in paths {
        let name = file_name(&path);
        if name.contains('~') {
            debug!("skipping temporary file {}", name);
            continue;
        }

        let descriptor = descriptors
            .iter()
            .find(|d| d.matches(&name))
            .ok_or_else(|| LedgerError::validation(&name, format!("no descriptor matches {}", name)))?;

        debug!("{} -> {}", name, descriptor.name);
        sources.push(SourceFile {
            path,
            file_name: name,
            descriptor: descriptor.clone(),
        });
    }

    info!("collected {} source files from {}", sources.len(), folder.display());
    Ok(sources)
}

// ============================================================================
// RAW FRAME
// ============================================================================

/// Headered table of untyped cells, exactly as read from the file
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub source_name: String,
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawFrame {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Read a delimited file into a `RawFrame`
pub fn read_frame(source: &SourceFile) -> Result<RawFrame> {
    let delimiter = source
        .descriptor
        .delimiter_byte()
        .ok_or_else(|| LedgerError::validation(&source.descriptor.name, "delimiter must be a single byte"))?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_path(&source.path)?;

    let headers = rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        records.push(record.iter().map(str::to_string).collect());
    }

    debug!("read {}: {} records", source.file_name, records.len());
    Ok(RawFrame {
        source_name: source.file_name.clone(),
        headers,
        records,
    })
}

// ============================================================================
// TESTS
// ============================================================================

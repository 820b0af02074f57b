//! Section Parser (C4), Section Crypto (C5), and Redaction Engine (C6).
//!
//! A `ParsedDocument` is the common shape both parsers (HTML, DOCX) produce;
//! everything downstream (crypto, redaction) only ever sees this shape.

pub mod crypto;
pub mod docx;
pub mod html;
pub mod redact;

use crate::classification::Clearance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Html,
    Docx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSection {
    pub section_id: String,
    pub clearance: Clearance,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub overall_classification: Clearance,
    pub per_level_counts: BTreeMap<String, usize>,
    pub source_format: SourceFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub sections: Vec<ParsedSection>,
    pub metadata: DocumentMeta,
    /// Present only for DOCX input: the original bytes, kept so the
    /// redaction engine can produce a layout-preserving redacted copy
    /// instead of re-rendering from scratch.
    #[serde(skip)]
    pub original_bytes: Option<Vec<u8>>,
}

pub fn summarize(sections: &[ParsedSection], title: String, source_format: SourceFormat) -> DocumentMeta {
    let mut per_level_counts = BTreeMap::new();
    let mut overall = Clearance::Internal;
    for section in sections {
        *per_level_counts
            .entry(section.clearance.to_string())
            .or_insert(0usize) += 1;
        overall = overall.max(section.clearance);
    }
    DocumentMeta {
        title,
        overall_classification: overall,
        per_level_counts,
        source_format,
    }
}

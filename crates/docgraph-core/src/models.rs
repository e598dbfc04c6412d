//! Knowledge graph entities.
//!
//! Nodes reference each other only through stable string ids. The graph
//! store owns the edges; nothing here holds a pointer to another node, so
//! concept-to-concept and document-to-document cycles need no special care.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Editorial weight applied to a document's retrieval score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionLevel {
    #[default]
    Standard,
    Promoted,
    Pinned,
}

impl PromotionLevel {
    /// Multiplier applied to the raw similarity score.
    pub fn boost(self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Promoted => 1.5,
            Self::Pinned => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Promoted => "promoted",
            Self::Pinned => "pinned",
        }
    }

    /// Parse a stored or user-supplied value, falling back to `Standard`.
    ///
    /// Legacy rows may carry `NULL`, `"draft"`, or anything else; none of
    /// those should break retrieval.
    pub fn from_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for PromotionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "draft" | "" => Ok(Self::Standard),
            "promoted" => Ok(Self::Promoted),
            "pinned" => Ok(Self::Pinned),
            other => Err(format!("unknown promotion level: {}", other)),
        }
    }
}

impl fmt::Display for PromotionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// SyncState key of the source this document was indexed from.
    pub source: String,
    /// Path relative to the source root; unique per source.
    pub file_path: String,
    pub title: String,
    /// Assigned by whatever classifies documents; no fixed vocabulary.
    pub doc_type: Option<String>,
    pub promotion: PromotionLevel,
    pub updated_at: DateTime<Utc>,
    /// Content-version marker (commit hash, content digest, ...).
    pub version: Option<String>,
    /// Normalized front matter.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub document_id: String,
    pub title: String,
    /// Zero-based position within the document.
    pub order: usize,
    /// Heading level, 1..=6.
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub section_id: String,
    pub document_id: String,
    /// Zero-based position within the section.
    pub order: usize,
    pub content: String,
    pub char_count: usize,
    /// Byte offset of the chunk start within the document body.
    pub start_offset: usize,
    /// Byte offset one past the chunk end within the document body.
    pub end_offset: usize,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
}

/// A named entity shared across documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl Concept {
    pub fn named(name: &str) -> Self {
        Self {
            id: concept_id(name),
            name: name.trim().to_string(),
            aliases: Vec::new(),
            category: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    pub id: String,
    pub chunk_id: String,
    pub language: Option<String>,
    pub code: String,
    pub description: Option<String>,
}

/// Last indexed version of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub source: String,
    pub version: String,
    pub synced_at: DateTime<Utc>,
}

/// Stable document id for a file within a source.
pub fn document_id(source: &str, file_path: &str) -> String {
    let key = format!("{}\0{}", source, file_path);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Stable id for the `index`-th child of `kind` under `parent_id`.
pub fn child_id(parent_id: &str, kind: &str, index: usize) -> String {
    let key = format!("{}/{}/{}", parent_id, kind, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Concept id: lowercase slug of the canonical name.
///
/// `"Circuit Breaker"` and `"circuit-breaker"` land on the same node.
pub fn concept_id(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    format!("concept:{}", slug)
}

/// Hex SHA-256 of a string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

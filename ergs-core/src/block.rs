use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arbitrary string-keyed metadata carried alongside a block's text.
///
/// Serialised as JSON at rest (`metadata_json` column); feeds the full-text
/// index alongside `text`.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A timestamped unit of indexed content.
///
/// `(source, id)` is unique per running system. A re-ingest with the same
/// `(source, id)` upserts `text`/`metadata` and advances `updated_at` but
/// never mutates `created_at`. `source` always matches the store the block
/// is persisted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub text: String,
    /// Datasource *instance* name: the partition key selecting a store.
    pub source: String,
    /// Datasource *kind* (e.g. "github"); governs renderers and prototype
    /// factories, not storage location.
    pub ds_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Block {
    /// Builds a new block stamped `created_at == updated_at == now`.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source: impl Into<String>,
        ds_type: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            ds_type: ds_type.into(),
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// The resolved `source` used for prototype rehydration: `metadata["source"]`
    /// if present, else the block's own `source`, else `ds_type`.
    pub fn resolved_source(&self) -> String {
        self.metadata
            .get("source")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| {
                if self.source.is_empty() {
                    self.ds_type.clone()
                } else {
                    self.source.clone()
                }
            })
    }

    pub fn to_view(&self) -> BlockView {
        BlockView {
            id: self.id.clone(),
            text: self.text.clone(),
            source: self.source.clone(),
            ds_type: Some(self.ds_type.clone()),
            created_at: self.created_at,
            metadata: self.metadata.clone(),
            formatted_html: None,
        }
    }
}

/// Read-optimized, serializable projection of a [`Block`] used by the
/// firehose wire format (and available to downstream renderers).
///
/// `formatted_html` is always `None` coming out of the core. HTML
/// rendering is an external collaborator's job; the field exists so callers
/// can fill it in without re-shaping the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockView {
    pub id: String,
    pub text: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ds_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_html: Option<String>,
}

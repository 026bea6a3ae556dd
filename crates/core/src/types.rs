use serde::{Deserialize, Serialize};

/// One previously-approved copy line with its precomputed embedding.
///
/// Same shape on disk (JSON array), on the wire (one object per NDJSON line),
/// and in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub line: String,
    pub embedding: Vec<f32>,
}

/// A label with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub label: String,
    pub score: f32,
}

impl ScoredCandidate {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self { label: label.into(), score }
    }
}

/// Body of `POST /get-suggestions`.
///
/// Every field may be absent or `null` on the wire; the pipeline decides
/// what counts as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    #[serde(default)]
    pub node_text: Option<String>,
    #[serde(default)]
    pub extra_context: Option<String>,
    #[serde(default)]
    pub style_guide_text: Option<String>,
}

impl SuggestionRequest {
    pub fn new(node_text: impl Into<String>, style_guide_text: impl Into<String>) -> Self {
        Self {
            node_text: Some(node_text.into()),
            extra_context: None,
            style_guide_text: Some(style_guide_text.into()),
        }
    }

    pub fn with_extra_context(mut self, extra: impl Into<String>) -> Self {
        self.extra_context = Some(extra.into());
        self
    }

    /// Node text, if present and not blank.
    pub fn node_text(&self) -> Option<&str> {
        non_blank(self.node_text.as_deref())
    }

    /// Style guide, if present and not blank.
    pub fn style_guide_text(&self) -> Option<&str> {
        non_blank(self.style_guide_text.as_deref())
    }
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.trim().is_empty())
}

/// Response of `POST /get-suggestions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    /// Corpus lines nearest to the node text, best first.
    pub reuse_suggestions: Vec<String>,
    /// Freshly generated rewrites.
    pub new_suggestions: Vec<String>,
}

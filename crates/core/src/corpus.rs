//! Reuse corpus: the approved copy lines and their embeddings.
//!
//! Two shapes are accepted: a JSON array of `{line, embedding}` objects (loaded
//! whole into a [`CorpusHandle`]) and JSON lines, one object per line, which
//! [`NdjsonDecoder`] decodes incrementally from arbitrary byte chunks.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::CorpusEntry;

/// Longest NDJSON line the decoder will buffer. A 3072-dimension embedding
/// serialises to well under 100 KiB.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// The corpus could not be read at all (I/O, network, HTTP status).
    #[error("corpus unavailable: {0}")]
    Unavailable(String),
    /// The corpus was read but its content is malformed.
    #[error("corpus corrupted: {0}")]
    Corrupted(String),
}

/// Loaded corpus. Immutable after construction and cheap to clone; every
/// clone shares the same entries.
#[derive(Debug, Clone)]
pub struct CorpusHandle {
    entries: Arc<[CorpusEntry]>,
    dimension: Option<usize>,
    loaded_at: DateTime<Utc>,
}

impl CorpusHandle {
    /// Wrap already-decoded entries. All embeddings must be non-empty and share
    /// one dimensionality.
    pub fn new(entries: Vec<CorpusEntry>) -> Result<Self, CorpusError> {
        let dimension = entries.first().map(|e| e.embedding.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.embedding.is_empty() {
                return Err(CorpusError::Corrupted(format!("entry {i}: empty embedding")));
            }
            if Some(entry.embedding.len()) != dimension {
                return Err(CorpusError::Corrupted(format!(
                    "entry {i}: {} dimensions, expected {}",
                    entry.embedding.len(),
                    dimension.unwrap_or_default(),
                )));
            }
        }
        Ok(Self { entries: entries.into(), dimension, loaded_at: Utc::now() })
    }

    /// Decode a JSON array of entries.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CorpusError> {
        let entries: Vec<CorpusEntry> = serde_json::from_slice(bytes)
            .map_err(|e| CorpusError::Corrupted(e.to_string()))?;
        Self::new(entries)
    }

    /// Decode JSON lines.
    pub fn from_ndjson_slice(bytes: &[u8]) -> Result<Self, CorpusError> {
        let mut decoder = NdjsonDecoder::new();
        let mut entries = decoder.push(bytes)?;
        entries.extend(decoder.finish()?);
        Self::new(entries)
    }

    /// Read a corpus file. `.ndjson` and `.jsonl` files are decoded as JSON
    /// lines, anything else as a JSON array.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CorpusError::Unavailable(format!("{}: {e}", path.display())))?;

        let is_lines = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("ndjson" | "jsonl")
        );
        let handle = if is_lines {
            Self::from_ndjson_slice(&bytes)?
        } else {
            Self::from_json_slice(&bytes)?
        };

        tracing::info!(
            path = %path.display(),
            entries = handle.len(),
            dimension = handle.dimension.unwrap_or_default(),
            loaded_at = %handle.loaded_at,
            "corpus loaded"
        );
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared embedding dimensionality, `None` for an empty corpus.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Incremental JSON-lines decoder.
///
/// Holds at most one incomplete line between calls to [`push`](Self::push).
/// Blank lines are skipped; a final line without a trailing newline is
/// returned by [`finish`](Self::finish). Any line longer than
/// [`MAX_LINE_BYTES`] is rejected, however it was split across chunks.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
    line_no: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk; returns every entry completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<CorpusEntry>, CorpusError> {
        let mut pos = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        while let Some(off) = self.buf[pos..].iter().position(|&b| b == b'\n') {
            let end = pos + off;
            self.line_no += 1;
            check_line_len(end - start, self.line_no)?;
            if let Some(entry) = decode_line(&self.buf[start..end], self.line_no)? {
                out.push(entry);
            }
            start = end + 1;
            pos = start;
        }
        self.buf.drain(..start);

        check_line_len(self.buf.len(), self.line_no + 1)?;
        Ok(out)
    }

    /// Decode whatever remains after the last newline.
    pub fn finish(&mut self) -> Result<Option<CorpusEntry>, CorpusError> {
        let rest = std::mem::take(&mut self.buf);
        if rest.is_empty() {
            return Ok(None);
        }
        self.line_no += 1;
        check_line_len(rest.len(), self.line_no)?;
        decode_line(&rest, self.line_no)
    }

    /// Lines consumed so far, including blank ones.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

fn check_line_len(len: usize, line_no: usize) -> Result<(), CorpusError> {
    if len > MAX_LINE_BYTES {
        return Err(CorpusError::Corrupted(format!(
            "line {line_no} exceeds {MAX_LINE_BYTES} bytes"
        )));
    }
    Ok(())
}

fn decode_line(line: &[u8], line_no: usize) -> Result<Option<CorpusEntry>, CorpusError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    decode_entry(line, || format!("line {line_no}")).map(Some)
}

fn decode_entry<F: Fn() -> String>(bytes: &[u8], at: F) -> Result<CorpusEntry, CorpusError> {
    let entry: CorpusEntry = serde_json::from_slice(bytes)
        .map_err(|e| CorpusError::Corrupted(format!("{}: {e}", at())))?;
    if entry.embedding.is_empty() {
        return Err(CorpusError::Corrupted(format!("{}: empty embedding", at())));
    }
    Ok(entry)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    #[default]
    Start,
    /// After `[`: an element or `]`.
    First,
    /// After `,`: an element.
    Next,
    Element,
    /// After an element: `,` or `]`.
    After,
    Closed,
}

/// Incremental decoder for a JSON array of entries, `[{..}, {..}]`.
///
/// Each top-level object is decoded as soon as its closing brace arrives;
/// only the element in progress is buffered, capped at [`MAX_LINE_BYTES`].
#[derive(Debug, Default)]
pub struct JsonArrayDecoder {
    state: ArrayState,
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    elements: usize,
}

impl JsonArrayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<CorpusEntry>, CorpusError> {
        let mut out = Vec::new();
        for &b in chunk {
            if self.state == ArrayState::Element {
                self.buf.push(b);
                if self.closes_element(b) {
                    self.elements += 1;
                    let n = self.elements;
                    out.push(decode_entry(&self.buf, || format!("element {n}"))?);
                    self.buf.clear();
                    self.state = ArrayState::After;
                } else if self.buf.len() > MAX_LINE_BYTES {
                    return Err(CorpusError::Corrupted(format!(
                        "element {} exceeds {MAX_LINE_BYTES} bytes",
                        self.elements + 1
                    )));
                }
                continue;
            }
            if b.is_ascii_whitespace() {
                continue;
            }
            self.state = match (self.state, b) {
                (ArrayState::Start, b'[') => ArrayState::First,
                (ArrayState::First | ArrayState::Next, b'{') => {
                    self.buf.push(b);
                    self.depth = 1;
                    ArrayState::Element
                }
                (ArrayState::First | ArrayState::After, b']') => ArrayState::Closed,
                (ArrayState::After, b',') => ArrayState::Next,
                (_, b) => {
                    return Err(CorpusError::Corrupted(format!(
                        "element {}: unexpected {:?}",
                        self.elements + 1,
                        char::from(b)
                    )));
                }
            };
        }
        Ok(out)
    }

    /// Fails unless the closing `]` has been seen.
    pub fn finish(&mut self) -> Result<(), CorpusError> {
        if self.state == ArrayState::Closed {
            Ok(())
        } else {
            Err(CorpusError::Corrupted(format!(
                "array truncated after {} elements",
                self.elements
            )))
        }
    }

    pub fn elements_read(&self) -> usize {
        self.elements
    }

    /// Track string and nesting state; true when `b` closes the element.
    fn closes_element(&mut self, b: u8) -> bool {
        if self.in_string {
            match b {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return false;
        }
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth -= 1;
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

/// Streaming corpus decoder that accepts either shape. The first
/// non-whitespace byte decides: `[` starts a JSON array, anything else is
/// read as JSON lines.
#[derive(Debug)]
pub enum CorpusDecoder {
    Sniffing { blank_lines: usize },
    Lines(NdjsonDecoder),
    Array(JsonArrayDecoder),
}

impl Default for CorpusDecoder {
    fn default() -> Self {
        Self::Sniffing { blank_lines: 0 }
    }
}

impl CorpusDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<CorpusEntry>, CorpusError> {
        match self {
            Self::Lines(d) => d.push(chunk),
            Self::Array(d) => d.push(chunk),
            Self::Sniffing { blank_lines } => {
                let Some(first) = chunk.iter().position(|b| !b.is_ascii_whitespace()) else {
                    *blank_lines += count_newlines(chunk);
                    return Ok(Vec::new());
                };
                let skipped = *blank_lines + count_newlines(&chunk[..first]);
                *self = if chunk[first] == b'[' {
                    Self::Array(JsonArrayDecoder::new())
                } else {
                    Self::Lines(NdjsonDecoder { buf: Vec::new(), line_no: skipped })
                };
                self.push(&chunk[first..])
            }
        }
    }

    /// End of input. An empty stream is an empty corpus.
    pub fn finish(&mut self) -> Result<Option<CorpusEntry>, CorpusError> {
        match self {
            Self::Sniffing { .. } => Ok(None),
            Self::Lines(d) => d.finish(),
            Self::Array(d) => d.finish().map(|()| None),
        }
    }

    pub fn format(&self) -> &'static str {
        match self {
            Self::Sniffing { .. } => "empty",
            Self::Lines(_) => "ndjson",
            Self::Array(_) => "json-array",
        }
    }

    /// Entries or lines consumed so far.
    pub fn records_read(&self) -> usize {
        match self {
            Self::Sniffing { .. } => 0,
            Self::Lines(d) => d.lines_read(),
            Self::Array(d) => d.elements_read(),
        }
    }
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINES: &str = concat!(
        r#"{"line":"Save","embedding":[1.0,0.0]}"#, "\n",
        "\n",
        r#"{"line":"Cancel","embedding":[0.0,1.0]}"#, "\r\n",
        r#"{"line":"Delete","embedding":[-1.0,0.0]}"#,
    );

    fn lines_of(entries: &[CorpusEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.line.as_str()).collect()
    }

    #[test]
    fn decodes_whole_buffer() {
        let mut d = NdjsonDecoder::new();
        let mut got = d.push(LINES.as_bytes()).unwrap();
        assert_eq!(lines_of(&got), vec!["Save", "Cancel"]);
        got.extend(d.finish().unwrap());
        assert_eq!(lines_of(&got), vec!["Save", "Cancel", "Delete"]);
        assert_eq!(d.lines_read(), 4);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        for size in [1, 2, 3, 7, 16, 64] {
            let mut d = NdjsonDecoder::new();
            let mut got = Vec::new();
            for chunk in LINES.as_bytes().chunks(size) {
                got.extend(d.push(chunk).unwrap());
            }
            got.extend(d.finish().unwrap());
            assert_eq!(lines_of(&got), vec!["Save", "Cancel", "Delete"], "chunk size {size}");
        }
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let mut d = NdjsonDecoder::new();
        let err = d
            .push(b"{\"line\":\"ok\",\"embedding\":[1.0]}\n{\"line\":\"bad\"}\n")
            .unwrap_err();
        match err {
            CorpusError::Corrupted(msg) => assert!(msg.starts_with("line 2:"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_embedding_is_corrupt() {
        let mut d = NdjsonDecoder::new();
        let err = d.push(b"{\"line\":\"x\",\"embedding\":[]}\n").unwrap_err();
        assert!(matches!(err, CorpusError::Corrupted(_)));
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut d = NdjsonDecoder::new();
        let big = vec![b' '; MAX_LINE_BYTES + 1];
        assert!(matches!(d.push(&big), Err(CorpusError::Corrupted(_))));
    }

    /// A well-formed entry whose serialised line is just over the limit.
    fn overlong_entry_line() -> String {
        format!("{{\"line\":\"x\",\"embedding\":[{}0]}}\n", "0,".repeat(MAX_LINE_BYTES / 2))
    }

    #[test]
    fn overlong_line_rejected_whole_or_split() {
        let line = overlong_entry_line();
        assert!(line.len() > MAX_LINE_BYTES + 1);

        let mut d = NdjsonDecoder::new();
        assert!(matches!(d.push(line.as_bytes()), Err(CorpusError::Corrupted(_))));

        let mut d = NdjsonDecoder::new();
        let split = line
            .as_bytes()
            .chunks(64 * 1024)
            .try_for_each(|chunk| d.push(chunk).map(drop));
        assert!(matches!(split, Err(CorpusError::Corrupted(_))));

        let unterminated = line.trim_end();
        let mut d = NdjsonDecoder::new();
        let err = d.push(unterminated.as_bytes()).and_then(|_| d.finish().map(drop));
        assert!(matches!(err, Err(CorpusError::Corrupted(_))));

        assert!(CorpusHandle::from_ndjson_slice(line.as_bytes()).is_err());
    }

    const ARRAY: &str = r#" [
        {"line":"Save","embedding":[1.0,0.0]},
        {"line":"Say \"hi\" {}]","embedding":[0.0,1.0]} ,
        {"line":"Delete","embedding":[-1.0,0.0]}
    ] "#;

    #[test]
    fn array_decodes_across_any_chunking() {
        for size in [1, 2, 5, 13, 64, ARRAY.len()] {
            let mut d = JsonArrayDecoder::new();
            let mut got = Vec::new();
            for chunk in ARRAY.as_bytes().chunks(size) {
                got.extend(d.push(chunk).unwrap());
            }
            d.finish().unwrap();
            assert_eq!(lines_of(&got), vec!["Save", "Say \"hi\" {}]", "Delete"], "chunk size {size}");
            assert_eq!(d.elements_read(), 3);
        }
    }

    #[test]
    fn empty_array_is_fine() {
        let mut d = JsonArrayDecoder::new();
        assert!(d.push(b"[ ]").unwrap().is_empty());
        d.finish().unwrap();
    }

    #[test]
    fn array_rejects_malformed_input() {
        for bad in [
            r#"{"line":"a","embedding":[1]}"#,
            r#"[{"line":"a","embedding":[1]},]"#,
            r#"[{"line":"a","embedding":[1]} {"line":"b","embedding":[1]}]"#,
            r#"[1, 2]"#,
            r#"[{"line":"a","embedding":[1]}] x"#,
            r#"[{"line":"a"}]"#,
        ] {
            let mut d = JsonArrayDecoder::new();
            assert!(matches!(d.push(bad.as_bytes()), Err(CorpusError::Corrupted(_))), "{bad}");
        }
    }

    #[test]
    fn truncated_array_fails_at_finish() {
        let mut d = JsonArrayDecoder::new();
        let got = d.push(br#"[{"line":"a","embedding":[1]},{"line":"b","emb"#).unwrap();
        assert_eq!(lines_of(&got), vec!["a"]);
        assert!(matches!(d.finish(), Err(CorpusError::Corrupted(_))));
    }

    #[test]
    fn overlong_array_element_is_rejected() {
        let element = overlong_entry_line();
        let mut d = JsonArrayDecoder::new();
        let res = d.push(b"[").and_then(|_| d.push(element.as_bytes()));
        assert!(matches!(res, Err(CorpusError::Corrupted(_))));
    }

    #[test]
    fn corpus_decoder_picks_shape_from_content() {
        let mut d = CorpusDecoder::new();
        assert!(d.push(b"  \n").unwrap().is_empty());
        assert_eq!(d.format(), "empty");
        let mut got = d.push(ARRAY.as_bytes()).unwrap();
        got.extend(d.finish().unwrap());
        assert_eq!(d.format(), "json-array");
        assert_eq!(got.len(), 3);

        let mut d = CorpusDecoder::new();
        let mut got = Vec::new();
        for chunk in LINES.as_bytes().chunks(5) {
            got.extend(d.push(chunk).unwrap());
        }
        got.extend(d.finish().unwrap());
        assert_eq!(d.format(), "ndjson");
        assert_eq!(lines_of(&got), vec!["Save", "Cancel", "Delete"]);
    }

    #[test]
    fn corpus_decoder_keeps_line_numbers_after_leading_blanks() {
        let mut d = CorpusDecoder::new();
        d.push(b"\n\n").unwrap();
        let err = d.push(b"{\"line\":\"bad\"}\n").unwrap_err();
        match err {
            CorpusError::Corrupted(msg) => assert!(msg.starts_with("line 3:"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_stream_is_empty_corpus() {
        let mut d = CorpusDecoder::new();
        assert!(d.finish().unwrap().is_none());
        assert_eq!(d.records_read(), 0);
    }

    #[test]
    fn finish_on_empty_is_none() {
        let mut d = NdjsonDecoder::new();
        assert!(d.finish().unwrap().is_none());
    }

    #[test]
    fn handle_from_json_array() {
        let h = CorpusHandle::from_json_slice(
            br#"[{"line":"a","embedding":[1,0]},{"line":"b","embedding":[0,1]}]"#,
        )
        .unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h.dimension(), Some(2));
        assert_eq!(h.entries()[1].line, "b");
    }

    #[test]
    fn handle_rejects_mixed_dimensions() {
        let err = CorpusHandle::new(vec![
            CorpusEntry { line: "a".into(), embedding: vec![1.0, 0.0] },
            CorpusEntry { line: "b".into(), embedding: vec![1.0] },
        ])
        .unwrap_err();
        match err {
            CorpusError::Corrupted(msg) => assert!(msg.contains("entry 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_handle_has_no_dimension() {
        let h = CorpusHandle::new(Vec::new()).unwrap();
        assert!(h.is_empty());
        assert_eq!(h.dimension(), None);
    }

    #[test]
    fn clones_share_entries() {
        let h = CorpusHandle::from_ndjson_slice(LINES.as_bytes()).unwrap();
        let c = h.clone();
        assert!(std::ptr::eq(h.entries().as_ptr(), c.entries().as_ptr()));
        assert_eq!(c.len(), 3);
    }

    #[tokio::test]
    async fn load_missing_file_is_unavailable() {
        let err = CorpusHandle::load("/nonexistent/corpus.json").await.unwrap_err();
        assert!(matches!(err, CorpusError::Unavailable(_)));
    }
}

//! Document processing: parsing, normalization, and chunking.
//!
//! Raw bytes come in with a format hint, get normalized into plain text with
//! structural metadata, and are split into overlapping chunks sized for
//! similarity search.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::config::ChunkingConfig;
use crate::core::errors::RagError;

/// Registered input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
}

impl DocumentFormat {
    /// Resolve a caller-supplied hint (usually a file extension).
    pub fn from_hint(hint: &str) -> Result<Self, RagError> {
        match hint.trim().trim_start_matches('.').to_lowercase().as_str() {
            "txt" | "text" | "plain" => Ok(DocumentFormat::PlainText),
            "md" | "markdown" => Ok(DocumentFormat::Markdown),
            "html" | "htm" => Ok(DocumentFormat::Html),
            other => Err(RagError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A structural marker extracted from the document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Character offset of the heading in the normalized text.
    pub offset: usize,
}

/// A parsed, normalized source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Content-hash derived id, stable across re-ingestion of identical
    /// content.
    pub id: String,
    /// Path, URL, or other caller-supplied origin.
    pub source: String,
    /// Normalized text.
    pub text: String,
    pub sections: Vec<Section>,
}

/// A contiguous span of a document's text. Offsets are character offsets
/// into the normalized text; consecutive chunks share `overlap` characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Characters shared with the previous chunk (0 for the first).
    pub overlap: usize,
}

/// Parses raw documents and splits them into overlapping chunks.
pub struct DocumentProcessor {
    config: ChunkingConfig,
    heading_re: Regex,
    chapter_re: Regex,
}

impl DocumentProcessor {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            config: config.clone(),
            heading_re: Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("valid heading pattern"),
            chapter_re: Regex::new(r"(?mi)^chapter\s+\d+\b.*$").expect("valid chapter pattern"),
        }
    }

    /// Parse raw bytes into a normalized [`Document`].
    ///
    /// Fails with [`RagError::ParseFailure`] on corrupt input; the caller may
    /// skip the document and continue.
    pub fn process(
        &self,
        raw: &[u8],
        format: DocumentFormat,
        source: &str,
    ) -> Result<Document, RagError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| RagError::ParseFailure(format!("{source}: invalid utf-8: {e}")))?;

        let text = match format {
            DocumentFormat::Html => normalize(&strip_html_tags(text)),
            DocumentFormat::PlainText | DocumentFormat::Markdown => normalize(text),
        };
        if text.is_empty() {
            return Err(RagError::ParseFailure(format!("{source}: empty document")));
        }

        let sections = self.extract_sections(&text);
        let id = content_id(&text);

        tracing::debug!(
            "processed document {} from {} ({} chars, {} sections)",
            id,
            source,
            text.chars().count(),
            sections.len()
        );

        Ok(Document {
            id,
            source: source.to_string(),
            text,
            sections,
        })
    }

    /// Split a document into overlapping chunks.
    ///
    /// Windows of `chunk_size` characters, each after the first starting
    /// `chunk_overlap` characters before the prior chunk's end. A window that
    /// contains a paragraph break in its tail ends there instead. A trailing
    /// fragment shorter than `min_chunk_size` merges into the previous chunk.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let min = self.config.min_chunk_size;

        let mut chunks: Vec<Chunk> = Vec::new();
        if total == 0 {
            return chunks;
        }

        let mut start = 0usize;
        let mut index = 0usize;
        loop {
            let mut end = (start + size).min(total);
            if end < total {
                // Prefer ending at a paragraph break, but never produce a
                // chunk shorter than min_chunk_size or one that fails to
                // advance past the overlap region.
                let floor = start + min.max(overlap + 1);
                if let Some(boundary) = paragraph_boundary(&chars, floor, end) {
                    end = boundary;
                }
            }

            if end == total && end - start < min {
                if let Some(prev) = chunks.last_mut() {
                    prev.text = chars[prev.start..total].iter().collect();
                    prev.end = total;
                    break;
                }
            }

            let this_overlap = chunks.last().map_or(0, |prev| prev.end - start);
            chunks.push(Chunk {
                document_id: document.id.clone(),
                index,
                text: chars[start..end].iter().collect(),
                start,
                end,
                overlap: this_overlap,
            });

            if end == total {
                break;
            }
            index += 1;
            start = end.saturating_sub(overlap).max(start + 1);
        }

        chunks
    }

    fn extract_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        for caps in self.heading_re.captures_iter(text) {
            if let (Some(whole), Some(title)) = (caps.get(0), caps.get(1)) {
                sections.push(Section {
                    title: title.as_str().trim().to_string(),
                    offset: char_offset(text, whole.start()),
                });
            }
        }
        for m in self.chapter_re.find_iter(text) {
            sections.push(Section {
                title: m.as_str().trim().to_string(),
                offset: char_offset(text, m.start()),
            });
        }
        sections.sort_by_key(|s| s.offset);
        sections.dedup_by_key(|s| s.offset);
        sections
    }
}

/// Content-hash derived id: identical text always maps to the same id.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

fn char_offset(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}

/// Last paragraph break (blank line) at position `floor..end`, if any.
fn paragraph_boundary(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    if end < 2 || floor >= end {
        return None;
    }
    let mut p = end - 2;
    while p > floor {
        if chars[p] == '\n' && chars[p + 1] == '\n' {
            return Some(p);
        }
        p -= 1;
    }
    None
}

fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    // Collapse runs of blank lines down to a single paragraph break, and
    // strip trailing whitespace per line.
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_matches('\n').to_string()
}

/// Strip tags plus script/style bodies from HTML.
pub fn strip_html_tags(html: &str) -> String {
    let chars: Vec<char> = html.chars().collect();
    let lower: Vec<char> = html.to_lowercase().chars().collect();

    fn tag_at(lower: &[char], i: usize, tag: &str) -> bool {
        let tag: Vec<char> = tag.chars().collect();
        i + tag.len() <= lower.len() && lower[i..i + tag.len()] == tag[..]
    }

    let mut out = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut i = 0;
    while i < chars.len() {
        if in_script {
            if tag_at(&lower, i, "</script>") {
                in_script = false;
                i += "</script>".len();
            } else {
                i += 1;
            }
            continue;
        }
        if in_style {
            if tag_at(&lower, i, "</style>") {
                in_style = false;
                i += "</style>".len();
            } else {
                i += 1;
            }
            continue;
        }

        let c = chars[i];
        if c == '<' {
            if tag_at(&lower, i, "<script") {
                in_script = true;
            } else if tag_at(&lower, i, "<style") {
                in_style = true;
            }
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
            out.push(' ');
        } else if !in_tag {
            out.push(c);
        }
        i += 1;
    }

    let lines: Vec<&str> = out
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(chunk_size: usize, overlap: usize, min: usize) -> DocumentProcessor {
        DocumentProcessor::new(&ChunkingConfig {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        })
    }

    fn plain_document(text: &str) -> Document {
        processor(100, 20, 30)
            .process(text.as_bytes(), DocumentFormat::PlainText, "test")
            .expect("document should parse")
    }

    #[test]
    fn windowed_chunking_offsets() {
        let text = "a".repeat(250);
        let doc = plain_document(&text);
        let chunks = processor(100, 20, 30).chunk(&doc);

        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
        assert_eq!(chunks[2].text.chars().count(), 90);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[1].overlap, 20);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "word ".repeat(300);
        let doc = plain_document(&text);
        let p = processor(100, 20, 30);
        assert_eq!(p.chunk(&doc), p.chunk(&doc));
    }

    #[test]
    fn consecutive_chunks_share_exact_overlap() {
        let text: String = ('a'..='z').cycle().take(500).collect();
        let doc = plain_document(&text);
        let chunks = processor(100, 20, 30).chunk(&doc);

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            let shared = pair[1].overlap;
            assert!(shared > 0);
            assert_eq!(prev[prev.len() - shared..], next[..shared]);
        }
    }

    #[test]
    fn trailing_fragment_merges_into_previous_chunk() {
        let text = "b".repeat(120);
        let doc = plain_document(&text);
        // stride 80, so the final window would be [80, 120) = 40 chars < 50
        let chunks = processor(100, 20, 50).chunk(&doc);

        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 120));
        assert_eq!(chunks[0].text.chars().count(), 120);
    }

    #[test]
    fn paragraph_break_preferred_over_hard_cut() {
        let text = format!("{}\n\n{}", "x".repeat(70), "y".repeat(200));
        let doc = plain_document(&text);
        let chunks = processor(100, 20, 30).chunk(&doc);

        assert_eq!(chunks[0].end, 70);
        assert!(chunks[0].text.chars().all(|c| c == 'x'));
    }

    #[test]
    fn no_gaps_across_the_sequence() {
        let text = "sentence one. ".repeat(100);
        let doc = plain_document(&text);
        let chunks = processor(100, 20, 30).chunk(&doc);

        assert_eq!(chunks[0].start, 0);
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end);
            assert!(pair[1].start > pair[0].start);
        }
        assert_eq!(chunks.last().map(|c| c.end), Some(doc.text.chars().count()));
    }

    #[test]
    fn document_id_is_stable_for_identical_content() {
        let a = plain_document("same content here, long enough to matter");
        let b = plain_document("same content here, long enough to matter");
        assert_eq!(a.id, b.id);

        let c = plain_document("different content here, long enough too");
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn rejects_unknown_format_hint() {
        assert!(matches!(
            DocumentFormat::from_hint("docx"),
            Err(RagError::UnsupportedFormat(_))
        ));
        assert_eq!(
            DocumentFormat::from_hint(".md").expect("md is registered"),
            DocumentFormat::Markdown
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        let p = processor(100, 20, 30);
        let err = p
            .process(&[0xff, 0xfe, 0x00], DocumentFormat::PlainText, "bad")
            .expect_err("invalid utf-8 must fail");
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn extracts_markdown_sections() {
        let p = processor(100, 20, 30);
        let doc = p
            .process(
                b"# Intro\n\nbody text\n\n## Details\n\nmore body\n\nChapter 2 The Sequel\n\nend",
                DocumentFormat::Markdown,
                "notes.md",
            )
            .expect("markdown should parse");

        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro", "Details", "Chapter 2 The Sequel"]);
        assert!(doc.sections.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn html_is_stripped_before_chunking() {
        let html = b"<html><head><script>var x = 1;</script></head>\
                     <body><h1>Hello</h1><p>World</p></body></html>";
        let doc = processor(100, 20, 30)
            .process(html, DocumentFormat::Html, "page.html")
            .expect("html should parse");

        assert!(doc.text.contains("Hello"));
        assert!(doc.text.contains("World"));
        assert!(!doc.text.contains('<'));
        assert!(!doc.text.contains("var x"));
    }
}

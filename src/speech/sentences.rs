//! Groups streamed tokens into speakable chunks.
//!
//! Voice output should not start one utterance per token. Tokens are
//! buffered until a sentence ends, or until a long run of text reaches a
//! clause break, and only then handed to the speech queue.

/// Minimum buffered length (bytes) before splitting on clause punctuation.
const CLAUSE_MIN_LEN: usize = 20;

/// Byte index of the first sentence-ending character that is followed by
/// whitespace. Punctuation at the very end of the buffer is not a boundary
/// yet: the next token may turn `3.` into `3.14`.
fn find_sentence_boundary(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let rest = &text[i + c.len_utf8()..];
            if c == '\n' || rest.starts_with(' ') || rest.starts_with('\n') {
                return Some(i + c.len_utf8() - 1);
            }
        }
    }
    None
}

/// Sentence boundary, or the last clause break once the buffer is long.
///
/// Returns the last byte of the boundary character so `text[..=pos]` is
/// char-safe.
fn find_clause_boundary(text: &str) -> Option<usize> {
    if let Some(pos) = find_sentence_boundary(text) {
        return Some(pos);
    }
    if text.len() < CLAUSE_MIN_LEN {
        return None;
    }
    let mut last_clause = None;
    for (i, c) in text.char_indices() {
        if matches!(c, ',' | ';' | ':' | '\u{2014}' | '\u{2013}') {
            let rest = &text[i + c.len_utf8()..];
            if rest.starts_with(' ') {
                last_clause = Some(i + c.len_utf8() - 1);
            }
        }
    }
    last_clause
}

/// Accumulates tokens and releases complete sentences.
#[derive(Debug, Default, Clone)]
pub struct SentenceBuffer {
    buffer: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token; returns every chunk it completed, trimmed and non-empty.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut out = Vec::new();
        while let Some(pos) = find_clause_boundary(&self.buffer) {
            let rest = self.buffer.split_off(pos + 1);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                out.push(chunk.to_owned());
            }
        }
        out
    }

    /// Release whatever is buffered.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

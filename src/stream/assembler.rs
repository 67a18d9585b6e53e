//! Record framing for chunked chat streams.
//!
//! Network reads arrive at arbitrary byte offsets. [`ChunkAssembler`] keeps
//! the residual bytes of a partial record and yields complete [`Record`]s in
//! arrival order.
//!
//! Two framings are supported:
//!
//! - [`Framing::Ndjson`]: each record is a JSON object terminated by `}`
//!   immediately followed by `\n`. The scan is not brace-depth aware, so a
//!   string value containing the two characters `}\n` splits the record
//!   early; the split fragment then fails to parse and surfaces as text.
//!   Leading `[`/`,` separators of a streamed JSON array are skipped.
//! - [`Framing::Text`]: plain token fragments. A `FEATURES:[...]` control
//!   marker is cut out as its own [`Record::Marker`] using a non-greedy
//!   match up to the first `]`. Text that might be the start of a marker is
//!   withheld until enough bytes arrive to decide.
//!
//! # Examples
//!
//! ```
//! use muse::stream::assembler::{ChunkAssembler, Record};
//!
//! let mut assembler = ChunkAssembler::ndjson();
//! assert!(assembler.feed(b"{\"a\":").is_empty());
//! let records = assembler.feed(b"1}\n{\"b\":2}\n");
//! assert_eq!(records.len(), 2);
//! assert!(matches!(&records[0], Record::Json(v) if v["a"] == 1));
//! ```

use tracing::debug;

/// Literal that opens a feature marker.
pub const MARKER_OPEN: &str = "FEATURES:[";

/// Terminator of an NDJSON record.
const RECORD_END: &str = "}\n";

/// How the byte stream is divided into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-terminated JSON objects.
    Ndjson,
    /// Plain text tokens with an optional trailing feature marker.
    Text,
}

/// One complete logical unit extracted from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A parsed JSON object (NDJSON framing).
    Json(serde_json::Value),
    /// Display text: a plain token fragment, or an NDJSON span that failed to parse.
    Text(String),
    /// A complete `FEATURES:[...]` span, brackets included.
    Marker(String),
}

/// Incremental record assembler. One instance per session.
#[derive(Debug)]
pub struct ChunkAssembler {
    framing: Framing,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text not yet forming a complete record.
    buffer: String,
}

impl ChunkAssembler {
    /// Create an assembler for the given framing.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            pending: Vec::new(),
            buffer: String::new(),
        }
    }

    /// Shorthand for [`Framing::Ndjson`].
    pub fn ndjson() -> Self {
        Self::new(Framing::Ndjson)
    }

    /// Shorthand for [`Framing::Text`].
    pub fn text() -> Self {
        Self::new(Framing::Text)
    }

    /// Text held back waiting for more bytes.
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    /// Feed raw bytes; returns every record completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Record> {
        let text = self.decode(chunk);
        self.feed_str(&text)
    }

    fn feed_str(&mut self, text: &str) -> Vec<Record> {
        self.buffer.push_str(text);
        let mut records = Vec::new();
        match self.framing {
            Framing::Ndjson => self.drain_ndjson(&mut records),
            Framing::Text => self.drain_text(&mut records),
        }
        records
    }

    /// Flush whatever remains once the stream has ended.
    ///
    /// An unterminated marker is released as plain text.
    pub fn finish(&mut self) -> Vec<Record> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.buffer.push_str(&tail);
        }

        let mut records = Vec::new();
        match self.framing {
            Framing::Ndjson => {
                self.drain_ndjson(&mut records);
                let rest = std::mem::take(&mut self.buffer);
                if let Some(record) = ndjson_record(&rest) {
                    records.push(record);
                }
            }
            Framing::Text => {
                self.drain_text(&mut records);
                let rest = std::mem::take(&mut self.buffer);
                if !rest.is_empty() {
                    records.push(Record::Text(rest));
                }
            }
        }
        records
    }

    /// Decode `chunk`, carrying an incomplete trailing UTF-8 sequence over
    /// to the next call. Invalid sequences become U+FFFD.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    fn drain_ndjson(&mut self, records: &mut Vec<Record>) {
        while let Some(idx) = self.buffer.find(RECORD_END) {
            let raw: String = self.buffer.drain(..idx + RECORD_END.len()).collect();
            if let Some(record) = ndjson_record(&raw) {
                records.push(record);
            }
        }
    }

    fn drain_text(&mut self, records: &mut Vec<Record>) {
        loop {
            if let Some(start) = self.buffer.find(MARKER_OPEN) {
                if start > 0 {
                    records.push(Record::Text(self.buffer.drain(..start).collect()));
                }
                match self.buffer[MARKER_OPEN.len()..].find(']') {
                    Some(rel) => {
                        let end = MARKER_OPEN.len() + rel + 1;
                        records.push(Record::Marker(self.buffer.drain(..end).collect()));
                        continue;
                    }
                    // Hold the open marker until its closing bracket arrives.
                    None => break,
                }
            }

            let keep = partial_marker_len(&self.buffer);
            let emit = self.buffer.len() - keep;
            if emit > 0 {
                records.push(Record::Text(self.buffer.drain(..emit).collect()));
            }
            break;
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of
/// [`MARKER_OPEN`].
fn partial_marker_len(text: &str) -> usize {
    (1..MARKER_OPEN.len())
        .rev()
        .find(|&k| text.ends_with(&MARKER_OPEN[..k]))
        .unwrap_or(0)
}

/// Turn one `}\n`-terminated span into a record.
fn ndjson_record(raw: &str) -> Option<Record> {
    let trimmed = raw
        .trim_start_matches(|c: char| c == '[' || c == ',' || c.is_whitespace())
        .trim_end_matches(|c: char| c == ']' || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => Some(Record::Json(value)),
        Err(e) => {
            debug!(error = %e, len = trimmed.len(), "unparseable stream record kept as text");
            Some(Record::Text(trimmed.to_owned()))
        }
    }
}

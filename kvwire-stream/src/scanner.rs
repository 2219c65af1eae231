//! Incremental extraction of rows from a streamed JSON array.
//!
//! The scanner walks bytes as they arrive and keeps only the unfinished
//! row (or object key) in its window. Completed rows are handed back as
//! owned [`Bytes`] and released immediately.

use crate::error::WindowError;
use crate::window::StreamWindow;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Container,
    String,
    Scalar,
}

#[derive(Debug, Clone, Copy)]
struct RowState {
    start: u64,
    kind: ValueKind,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Looking for the opening bracket of the row array.
    Preamble,
    /// Between rows.
    Rows,
    /// Inside a row.
    Row(RowState),
    /// The row array closed; remaining bytes are ignored.
    Trailer,
}

/// Lexical state for the bytes before the row array.
#[derive(Debug, Default)]
struct Lexer {
    depth: u32,
    in_string: bool,
    escaped: bool,
    string_start: u64,
    key_matched: bool,
    value_pending: bool,
}

/// Splits a JSON array into its top-level elements as bytes arrive.
///
/// By default the whole stream is expected to be an array. With
/// [`RowScanner::for_field`] the rows are taken from an array stored under a
/// field of the top-level object, as in a query response
/// `{"requestID":"..","results":[...],"status":"success"}`.
pub struct RowScanner<W: StreamWindow> {
    window: W,
    field: Option<Vec<u8>>,
    phase: Phase,
    lexer: Lexer,
    rows_emitted: u64,
}

impl<W: StreamWindow> RowScanner<W> {
    pub fn new(window: W) -> Self {
        Self {
            window,
            field: None,
            phase: Phase::Preamble,
            lexer: Lexer::default(),
            rows_emitted: 0,
        }
    }

    pub fn for_field(window: W, field: &str) -> Self {
        Self {
            field: Some(field.as_bytes().to_vec()),
            ..Self::new(window)
        }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Feeds the next chunk of the stream and returns every row it completed.
    pub fn feed(&mut self, chunk: Bytes) -> Result<Vec<Bytes>, WindowError> {
        let start = self.window.high_watermark();
        self.window.add(chunk)?;
        let end = self.window.high_watermark();
        let fresh = self.window.get_bytes(start, end)?;

        let mut rows = Vec::new();
        for (i, byte) in fresh.iter().enumerate() {
            self.step(*byte, start + i as u64, &mut rows)?;
        }

        let keep = self.retain_from(end);
        self.window.release_before(keep)?;
        Ok(rows)
    }

    /// Ends the stream. Fails if the row array never closed.
    pub fn finish(mut self) -> Result<W, WindowError> {
        let complete = matches!(self.phase, Phase::Trailer);
        self.window.close();
        if !complete {
            return Err(WindowError::Malformed(
                "stream ended before the row array closed".to_string(),
            ));
        }
        tracing::trace!(rows = self.rows_emitted, "row stream finished");
        Ok(self.window)
    }

    fn retain_from(&self, end: u64) -> u64 {
        match self.phase {
            Phase::Row(row) => row.start,
            Phase::Preamble if self.lexer.in_string => self.lexer.string_start,
            _ => end,
        }
    }

    fn step(&mut self, byte: u8, at: u64, rows: &mut Vec<Bytes>) -> Result<(), WindowError> {
        match self.phase {
            Phase::Preamble => self.step_preamble(byte, at),
            Phase::Rows => {
                self.phase = match byte {
                    b'[' | b'{' => Phase::Row(RowState::new(at, ValueKind::Container)),
                    b'"' => Phase::Row(RowState::new(at, ValueKind::String)),
                    b']' => Phase::Trailer,
                    b',' => Phase::Rows,
                    b if b.is_ascii_whitespace() => Phase::Rows,
                    _ => Phase::Row(RowState::new(at, ValueKind::Scalar)),
                };
                Ok(())
            }
            Phase::Row(mut row) => {
                match row.advance(byte) {
                    RowStep::Continue => self.phase = Phase::Row(row),
                    RowStep::EndsAfter => {
                        self.emit(row.start, at + 1, rows)?;
                        self.phase = Phase::Rows;
                    }
                    RowStep::EndsBefore => {
                        self.emit(row.start, at, rows)?;
                        self.phase = Phase::Rows;
                        return self.step(byte, at, rows);
                    }
                }
                Ok(())
            }
            Phase::Trailer => Ok(()),
        }
    }

    fn step_preamble(&mut self, byte: u8, at: u64) -> Result<(), WindowError> {
        let field = match &self.field {
            None => {
                return match byte {
                    b'[' => {
                        self.phase = Phase::Rows;
                        Ok(())
                    }
                    b if b.is_ascii_whitespace() => Ok(()),
                    other => Err(WindowError::Malformed(format!(
                        "expected '[' at offset {}, found {:?}",
                        at, other as char
                    ))),
                };
            }
            Some(field) => field,
        };

        let lexer = &mut self.lexer;
        if lexer.in_string {
            if lexer.escaped {
                lexer.escaped = false;
            } else if byte == b'\\' {
                lexer.escaped = true;
            } else if byte == b'"' {
                lexer.in_string = false;
                lexer.key_matched = lexer.depth == 1
                    && self.window.get_bytes(lexer.string_start, at)?.as_ref() == field.as_slice();
            }
            return Ok(());
        }
        if byte.is_ascii_whitespace() {
            return Ok(());
        }

        if lexer.value_pending {
            lexer.value_pending = false;
            if byte != b'[' {
                return Err(WindowError::Malformed(format!(
                    "field {:?} does not hold an array",
                    String::from_utf8_lossy(field)
                )));
            }
            self.phase = Phase::Rows;
            return Ok(());
        }

        let key_matched = std::mem::take(&mut lexer.key_matched);
        match byte {
            b'"' => {
                lexer.in_string = true;
                lexer.string_start = at + 1;
            }
            b':' => lexer.value_pending = key_matched,
            b'{' | b'[' => lexer.depth += 1,
            b'}' | b']' => lexer.depth = lexer.depth.saturating_sub(1),
            _ => {}
        }
        Ok(())
    }

    fn emit(&mut self, start: u64, end: u64, rows: &mut Vec<Bytes>) -> Result<(), WindowError> {
        rows.push(self.window.get_bytes(start, end)?);
        self.rows_emitted += 1;
        Ok(())
    }
}

enum RowStep {
    Continue,
    /// The current byte is the last byte of the row.
    EndsAfter,
    /// The current byte is a delimiter after the row.
    EndsBefore,
}

impl RowState {
    fn new(start: u64, kind: ValueKind) -> Self {
        Self {
            start,
            kind,
            depth: 1,
            in_string: kind == ValueKind::String,
            escaped: false,
        }
    }

    fn advance(&mut self, byte: u8) -> RowStep {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
                if self.kind == ValueKind::String {
                    return RowStep::EndsAfter;
                }
            }
            return RowStep::Continue;
        }

        match self.kind {
            ValueKind::Scalar => match byte {
                b',' | b']' => RowStep::EndsBefore,
                b if b.is_ascii_whitespace() => RowStep::EndsBefore,
                _ => RowStep::Continue,
            },
            ValueKind::Container => {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            return RowStep::EndsAfter;
                        }
                    }
                    _ => {}
                }
                RowStep::Continue
            }
            // strings only end inside the in_string branch
            ValueKind::String => RowStep::Continue,
        }
    }
}

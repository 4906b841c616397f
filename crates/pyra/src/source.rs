//! Source buffer and position tracking shared by the lexer, parser, and
//! error reporting.

use std::fmt;
use std::rc::Rc;

/// A half-open byte range into a [`Source`], used to tag tokens, AST nodes,
/// and bytecode so runtime errors and tracebacks can point at the original
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRange {
    pub start: u32,
    pub end: u32,
}

impl CodeRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn point(at: u32) -> Self {
        Self { start: at, end: at }
    }

    pub fn join(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Owns the text of a compiled script and the module/file name used in
/// tracebacks.
///
/// Cheaply clonable: the text is stored behind an `Rc<str>` so every AST
/// node, compiled function, and exception trace frame that needs to quote
/// source text or compute a line number can hold its own handle without
/// copying the buffer.
#[derive(Debug, Clone)]
pub struct Source {
    name: Rc<str>,
    text: Rc<str>,
    line_starts: Rc<[u32]>,
}

impl Source {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text: String = text.into();
        let line_starts = compute_line_starts(&text);
        Self {
            name: name.into().into(),
            text: text.into(),
            line_starts: line_starts.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn slice(&self, range: CodeRange) -> &str {
        let start = range.start as usize;
        let end = (range.end as usize).min(self.text.len()).max(start);
        &self.text[start..end]
    }

    /// Returns the 1-based line and column for a byte offset.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => (idx as u32 + 1, 1),
            Err(idx) => {
                let line_start = self.line_starts[idx - 1];
                (idx as u32, offset - line_start + 1)
            }
        }
    }

    /// Returns the full text of the line containing `offset`, without the
    /// trailing newline. Used to render the caret line under tracebacks.
    pub fn line_text(&self, offset: u32) -> &str {
        let idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let start = self.line_starts[idx] as usize;
        let end = self.line_starts.get(idx + 1).copied().unwrap_or(self.text.len() as u32) as usize;
        self.text[start..end].trim_end_matches(['\n', '\r'])
    }
}

fn compute_line_starts(text: &str) -> Vec<u32> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i as u32 + 1);
        }
    }
    starts
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

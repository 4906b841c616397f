//! Tokenizes source text into a flat stream carrying explicit
//! `Indent`/`Dedent`/`Newline` markers.
//!
//! The parser then recovers the logical-line tree described by the data
//! model by recursing on `Indent`/`Dedent` the way a descent parser
//! naturally would: a block is `Indent stmt* Dedent`. This is the same
//! token-stream encoding CPython's own tokenizer uses for the same
//! indentation grammar, and it keeps the parser a single linear pass
//! instead of first materializing a separate tree type only to walk it
//! again.

use crate::heap::Heap;
use crate::intern::Symbol;
use crate::source::CodeRange;

use super::token::{Keyword, Token, TokenKind, SYMBOLS};

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub range: CodeRange,
}

enum IndentUnit {
    Unknown,
    Spaces(usize),
    Tabs(usize),
}

pub struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    indents: Vec<usize>,
    unit: IndentUnit,
    bracket_depth: i32,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            indents: vec![0],
            unit: IndentUnit::Unknown,
            bracket_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self, heap: &mut Heap) -> Result<Vec<Token>, LexError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.consume_indentation()? {
                    break;
                }
            }
            self.skip_intraline_whitespace_and_comment();
            if self.pos >= self.bytes.len() {
                break;
            }
            let c = self.bytes[self.pos];
            if c == b'\n' {
                self.pos += 1;
                if self.bracket_depth == 0 {
                    self.push(TokenKind::Newline, self.pos - 1, self.pos);
                    self.at_line_start = true;
                }
                continue;
            }
            self.lex_one(heap)?;
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.pos, self.pos);
        }
        self.push(TokenKind::Eof, self.pos, self.pos);
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            range: CodeRange::new(start as u32, end as u32),
        });
    }

    fn skip_intraline_whitespace_and_comment(&mut self) {
        loop {
            match self.bytes.get(self.pos) {
                Some(b' ') | Some(b'\t') | Some(b'\r') => self.pos += 1,
                Some(b'#') => {
                    while self.bytes.get(self.pos).is_some_and(|&b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                Some(b'\\') if self.bytes.get(self.pos + 1) == Some(&b'\n') => {
                    self.pos += 2;
                }
                _ => break,
            }
        }
    }

    /// Consumes blank/comment-only lines, then measures and validates the
    /// next real line's indentation, emitting `Indent`/`Dedent` tokens.
    /// Returns `false` at end of input.
    fn consume_indentation(&mut self) -> Result<bool, LexError> {
        loop {
            let line_start = self.pos;
            let mut col = 0usize;
            while let Some(&b) = self.bytes.get(self.pos) {
                match b {
                    b' ' => {
                        col += 1;
                        self.pos += 1;
                    }
                    b'\t' => {
                        col += 1;
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
            match self.bytes.get(self.pos) {
                None => return Ok(false),
                Some(b'\n') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'#') => {
                    while self.bytes.get(self.pos).is_some_and(|&b| b != b'\n') {
                        self.pos += 1;
                    }
                    continue;
                }
                _ => {}
            }
            let indent_text = &self.text[line_start..self.pos];
            if !indent_text.is_empty() {
                let all_tabs = indent_text.bytes().all(|b| b == b'\t');
                let all_spaces = indent_text.bytes().all(|b| b == b' ');
                if !all_tabs && !all_spaces {
                    return Err(LexError {
                        message: "inconsistent use of tabs and spaces in indentation".to_owned(),
                        range: CodeRange::new(line_start as u32, self.pos as u32),
                    });
                }
                match &self.unit {
                    IndentUnit::Unknown => {
                        self.unit = if all_tabs {
                            IndentUnit::Tabs(indent_text.len())
                        } else {
                            IndentUnit::Spaces(indent_text.len())
                        };
                    }
                    IndentUnit::Spaces(_) if !all_spaces => {
                        return Err(LexError {
                            message: "indentation unit switched from spaces to tabs".to_owned(),
                            range: CodeRange::new(line_start as u32, self.pos as u32),
                        });
                    }
                    IndentUnit::Tabs(_) if !all_tabs => {
                        return Err(LexError {
                            message: "indentation unit switched from tabs to spaces".to_owned(),
                            range: CodeRange::new(line_start as u32, self.pos as u32),
                        });
                    }
                    _ => {}
                }
            }
            let unit_len = match self.unit {
                IndentUnit::Unknown => 1,
                IndentUnit::Spaces(n) | IndentUnit::Tabs(n) => n.max(1),
            };
            if col % unit_len != 0 {
                return Err(LexError {
                    message: "indentation is not a multiple of the file's indentation unit".to_owned(),
                    range: CodeRange::new(line_start as u32, self.pos as u32),
                });
            }
            let level = col / unit_len;
            let current = *self.indents.last().unwrap() / unit_len.max(1);
            if level > current + 1 {
                return Err(LexError {
                    message: "indentation increases by more than one level".to_owned(),
                    range: CodeRange::new(line_start as u32, self.pos as u32),
                });
            }
            if level > current {
                self.indents.push(col);
                self.push(TokenKind::Indent, line_start, self.pos);
            } else {
                while (*self.indents.last().unwrap() / unit_len.max(1)) > level {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, line_start, self.pos);
                }
            }
            self.at_line_start = false;
            return Ok(true);
        }
    }

    fn lex_one(&mut self, heap: &mut Heap) -> Result<(), LexError> {
        let start = self.pos;
        let c = self.bytes[self.pos];
        match c {
            b'(' | b'[' | b'{' => {
                self.bracket_depth += 1;
                self.lex_symbol(start)
            }
            b')' | b']' | b'}' => {
                self.bracket_depth -= 1;
                self.lex_symbol(start)
            }
            b'"' | b'\'' => self.lex_string(start),
            b'0'..=b'9' => self.lex_number(start),
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => self.lex_name_or_keyword(start, heap),
            _ => self.lex_symbol(start),
        }
    }

    fn lex_name_or_keyword(&mut self, start: usize, heap: &mut Heap) -> Result<(), LexError> {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|&b| b == b'_' || b.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let text = &self.text[start..self.pos];
        let kind = match Keyword::from_str(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(heap.intern(text)),
        };
        self.push(kind, start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self, start: usize) -> Result<(), LexError> {
        let mut is_float = false;
        if self.bytes[self.pos] == b'0' && matches!(self.bytes.get(self.pos + 1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B')) {
            let radix = match self.bytes[self.pos + 1] {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.bytes.get(self.pos).is_some_and(|&b| (b as char).is_digit(radix) || b == b'_') {
                self.pos += 1;
            }
            let digits: String = self.text[digits_start..self.pos].chars().filter(|&c| c != '_').collect();
            let value = i64::from_str_radix(&digits, radix).map_err(|_| LexError {
                message: "malformed integer literal".to_owned(),
                range: CodeRange::new(start as u32, self.pos as u32),
            })?;
            self.push(TokenKind::Int(value), start, self.pos);
            return Ok(());
        }
        while self.bytes.get(self.pos).is_some_and(|&b| b.is_ascii_digit() || b == b'_') {
            self.pos += 1;
        }
        if self.bytes.get(self.pos) == Some(&b'.') && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            self.pos += 1;
            while self.bytes.get(self.pos).is_some_and(|&b| b.is_ascii_digit() || b == b'_') {
                self.pos += 1;
            }
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.bytes.get(self.pos), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
                self.pos += 1;
            }
        }
        let digits: String = self.text[start..self.pos].chars().filter(|&c| c != '_').collect();
        if is_float {
            let value = digits.parse::<f64>().map_err(|_| LexError {
                message: "malformed float literal".to_owned(),
                range: CodeRange::new(start as u32, self.pos as u32),
            })?;
            self.push(TokenKind::Float(value), start, self.pos);
        } else {
            let value = digits.parse::<i64>().map_err(|_| LexError {
                message: "malformed integer literal".to_owned(),
                range: CodeRange::new(start as u32, self.pos as u32),
            })?;
            self.push(TokenKind::Int(value), start, self.pos);
        }
        Ok(())
    }

    fn lex_string(&mut self, start: usize) -> Result<(), LexError> {
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bytes.get(self.pos) {
                None | Some(b'\n') => {
                    return Err(LexError {
                        message: "unterminated string literal".to_owned(),
                        range: CodeRange::new(start as u32, self.pos as u32),
                    })
                }
                Some(&b) if b == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.bytes.get(self.pos) {
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'0') => out.push('\0'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'\'') => out.push('\''),
                        Some(b'"') => out.push('"'),
                        Some(b'\n') => {}
                        Some(b'x') => {
                            let hex = self.text.get(self.pos + 1..self.pos + 3).ok_or_else(|| LexError {
                                message: "truncated \\x escape".to_owned(),
                                range: CodeRange::new(start as u32, self.pos as u32),
                            })?;
                            let byte = u8::from_str_radix(hex, 16).map_err(|_| LexError {
                                message: "invalid \\x escape".to_owned(),
                                range: CodeRange::new(start as u32, self.pos as u32),
                            })?;
                            out.push(byte as char);
                            self.pos += 2;
                        }
                        Some(&other) => out.push(other as char),
                        None => {
                            return Err(LexError {
                                message: "unterminated string literal".to_owned(),
                                range: CodeRange::new(start as u32, self.pos as u32),
                            })
                        }
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    let ch_start = self.pos;
                    let ch = self.text[ch_start..].chars().next().unwrap();
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        self.push(TokenKind::Str(out), start, self.pos);
        Ok(())
    }

    fn lex_symbol(&mut self, start: usize) -> Result<(), LexError> {
        for &sym in SYMBOLS {
            if self.text[start..].starts_with(sym) {
                self.pos = start + sym.len();
                self.push(TokenKind::Symbol(sym), start, self.pos);
                return Ok(());
            }
        }
        Err(LexError {
            message: format!("invalid character {:?}", self.bytes[start] as char),
            range: CodeRange::new(start as u32, start as u32 + 1),
        })
    }
}

#[allow(dead_code)]
fn unused(_: Symbol) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<TokenKind> {
        let mut heap = Heap::new(crate::heap::HeapLimits::default());
        Lexer::new(src).tokenize(&mut heap).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_block_emits_indent_and_dedent() {
        let kinds = toks("if x:\n    y = 1\nz = 2\n");
        assert!(matches!(kinds[0], TokenKind::Keyword(Keyword::If)));
        assert!(kinds.contains(&TokenKind::Indent));
        assert!(kinds.contains(&TokenKind::Dedent));
    }

    #[test]
    fn continuation_inside_brackets_suppresses_newline() {
        let kinds = toks("x = (1 +\n2)\n");
        let newlines = kinds.iter().filter(|k| matches!(k, TokenKind::Newline)).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn hex_and_float_literals_parse() {
        let kinds = toks("0xFF\n1.5e2\n");
        assert!(matches!(kinds[0], TokenKind::Int(255)));
        assert!(matches!(kinds[1], TokenKind::Newline));
        assert!(matches!(kinds[2], TokenKind::Float(f) if (f - 150.0).abs() < 1e-9));
    }
}

use bytes::Bytes;
use std::ops::Range;

use crate::error::ParseError;
use crate::matcher::{Matcher, MatcherKind};
use crate::Result;

/// PDF whitespace, plus vertical tab which some producers emit.
#[inline]
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b'\0' | b'\t' | b'\n' | 0x0B | 0x0C | b'\r' | b' ')
}

/// A seekable position over an immutable in-memory PDF buffer.
#[derive(Clone, Debug)]
pub struct ByteCursor {
    buffer: Bytes,
    position: usize,
    matcher: MatcherKind,
}

impl ByteCursor {
    pub fn new(buffer: impl Into<Bytes>) -> ByteCursor {
        ByteCursor {
            buffer: buffer.into(),
            position: 0,
            matcher: MatcherKind::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: MatcherKind) -> ByteCursor {
        self.matcher = matcher;
        self
    }

    pub fn matcher(&self) -> MatcherKind {
        self.matcher
    }

    /// The whole underlying buffer.
    pub fn source(&self) -> &Bytes {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Bytes from the current position to the end of the buffer.
    pub fn remaining(&self) -> &[u8] {
        self.buffer.get(self.position..).unwrap_or_default()
    }

    pub fn current(&self) -> Option<u8> {
        self.buffer.get(self.position).copied()
    }

    pub fn peek(&self, n: usize) -> Option<u8> {
        self.buffer.get(self.position.checked_add(n)?).copied()
    }

    pub fn look_behind(&self, n: usize) -> Option<u8> {
        self.buffer.get(self.position.checked_sub(n)?).copied()
    }

    /// Moves one byte forward. Returns false when already at the end.
    pub fn advance(&mut self) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.position += 1;
        true
    }

    pub fn step_back(&mut self) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        true
    }

    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.buffer.len() {
            return Err(crate::Error::InvalidOffset(position));
        }
        self.position = position;
        Ok(())
    }

    pub fn skip_while(&mut self, predicate: impl Fn(u8) -> bool) {
        while self.current().is_some_and(&predicate) {
            self.position += 1;
        }
    }

    pub fn skip_whitespace(&mut self) {
        self.skip_while(is_whitespace)
    }

    /// Consumes a run of bytes matching `predicate` and returns its range.
    ///
    /// A token run always ends at a delimiter, so hitting the end of the buffer is an error.
    pub fn read_while(&mut self, predicate: impl Fn(u8) -> bool) -> Result<Range<usize>> {
        let start = self.position;
        self.skip_while(predicate);
        if self.is_at_end() {
            self.position = start;
            return Err(ParseError::EndOfInput.into());
        }
        Ok(start..self.position)
    }

    /// Reads an unsigned decimal number at the cursor.
    pub fn read_unsigned(&mut self) -> Result<u64> {
        let range = self.read_while(|c| c.is_ascii_digit())?;
        if range.is_empty() {
            return Err(self.unexpected_token().into());
        }
        let digits = std::str::from_utf8(&self.buffer[range])?;
        digits.parse().map_err(|_| self.unexpected_token().into())
    }

    /// Absolute offset of the first occurrence of `needle` at or after the cursor.
    pub fn find_pattern(&self, needle: &[u8]) -> Option<usize> {
        self.matcher
            .find(self.remaining(), needle)
            .map(|offset| self.position + offset)
    }

    /// Absolute offset of the last occurrence of `needle` at or after the cursor.
    pub fn find_last_pattern(&self, needle: &[u8]) -> Option<usize> {
        let mut found = None;
        let mut from = self.position;
        while let Some(offset) = self.buffer.get(from..).and_then(|rest| self.matcher.find(rest, needle)) {
            found = Some(from + offset);
            from += offset + 1;
        }
        found
    }

    /// Consumes `literal` if the buffer continues with it.
    pub fn match_literal(&mut self, literal: &[u8]) -> bool {
        if self.remaining().starts_with(literal) {
            self.position += literal.len();
            true
        } else {
            false
        }
    }

    /// Returns the rest of the current line and moves past its terminator.
    pub fn read_line(&mut self) -> &[u8] {
        let start = self.position;
        self.skip_while(|c| c != b'\n' && c != b'\r');
        let end = self.position;
        self.skip_eol();
        &self.buffer[start..end]
    }

    /// Moves to the start of the next line.
    pub fn next_line(&mut self) {
        self.read_line();
    }

    /// Moves back to the first byte of the current line.
    pub fn goto_line_start(&mut self) {
        while let Some(prev) = self.look_behind(1) {
            if prev == b'\n' || prev == b'\r' {
                break;
            }
            self.position -= 1;
        }
    }

    /// Skips one end-of-line marker: CRLF, LF or CR.
    pub fn skip_eol(&mut self) -> bool {
        self.match_literal(b"\r\n") || self.match_literal(b"\n") || self.match_literal(b"\r")
    }

    /// 1-based line and column of `offset`, and the text of that line.
    pub fn line_context(&self, offset: usize) -> (usize, usize, String) {
        let offset = offset.min(self.buffer.len());
        let head = &self.buffer[..offset];
        let mut line = 1;
        let mut line_start = 0;
        let mut i = 0;
        while i < head.len() {
            match head[i] {
                b'\r' if head.get(i + 1) == Some(&b'\n') => {
                    i += 1;
                    line += 1;
                    line_start = i + 1;
                }
                b'\r' | b'\n' => {
                    line += 1;
                    line_start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        let line_end = self.buffer[line_start..]
            .iter()
            .position(|&c| c == b'\n' || c == b'\r')
            .map_or(self.buffer.len(), |len| line_start + len);
        let text = String::from_utf8_lossy(&self.buffer[line_start..line_end]).into_owned();
        (line, offset - line_start + 1, text)
    }

    /// A diagnostic for the byte under the cursor.
    pub fn unexpected_token(&self) -> ParseError {
        self.unexpected_token_at(self.position)
    }

    pub fn unexpected_token_at(&self, offset: usize) -> ParseError {
        let (line, column, context) = self.line_context(offset);
        ParseError::UnexpectedToken {
            offset,
            line,
            column,
            found: self.buffer.get(offset).copied(),
            context,
        }
    }
}

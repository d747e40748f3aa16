//! Tokenizer for ToUnicode CMaps.
//!
//! Only `begincodespacerange`, `beginbfchar` and `beginbfrange` blocks carry meaning. Everything
//! else (the PostScript prologue, `CIDSystemInfo`, `usecmap` and so on) is skipped token by token,
//! so CMaps that deviate from the usual template still yield their mappings.

use super::{array, comment, dictionary, hexadecimal_string, is_regular, literal_string, name, NomResult, ParserInput};
use crate::Object;
use log::warn;
use nom::branch::alt;
use nom::bytes::complete::{take, take_while1};
use nom::combinator::map;
use nom::multi::many0;
use nom::sequence::preceded;
use nom::Parser;

/// Source codes are 1 to 4 bytes long and fit a `u32`.
pub type SourceCode = u32;
pub type CodeLen = u8;
pub(crate) type SourceRangeMapping = ((SourceCode, SourceCode, CodeLen), Vec<Vec<u16>>);
pub(crate) type SourceCharMapping = ((SourceCode, CodeLen), Vec<u16>);

#[derive(Debug, PartialEq)]
pub enum CMapSection {
    CsRange(Vec<(SourceCode, SourceCode, CodeLen)>),
    BfChar(Vec<SourceCharMapping>),
    BfRange(Vec<SourceRangeMapping>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Keyword(Vec<u8>),
    Hex(Vec<u8>),
    Array(Vec<Object>),
    Other,
}

fn token(input: ParserInput) -> NomResult<Token> {
    alt((
        map(dictionary, |_| Token::Other),
        map(hexadecimal_string, |object| match object {
            Object::String(bytes, _) => Token::Hex(bytes),
            _ => Token::Other,
        }),
        map(array, Token::Array),
        map(literal_string, |_| Token::Other),
        map(name, |_| Token::Other),
        map(comment, |_| Token::Other),
        map(take_while1(is_regular), |keyword: ParserInput| Token::Keyword(keyword.fragment().to_vec())),
        // A stray delimiter.
        map(take(1usize), |_| Token::Other),
    ))
    .parse(input)
}

fn whitespace(input: ParserInput) -> NomResult<()> {
    map(nom::bytes::complete::take_while(crate::cursor::is_whitespace), |_| ()).parse(input)
}

fn tokens(input: ParserInput) -> NomResult<Vec<Token>> {
    many0(preceded(whitespace, token)).parse(input)
}

/// A hex string as a source code: big-endian value and byte length.
fn source_code(bytes: &[u8]) -> Option<(SourceCode, CodeLen)> {
    if bytes.is_empty() || bytes.len() > 4 {
        warn!("cmap: source code <{}> is not 1 to 4 bytes long", hex(bytes));
        return None;
    }
    let code = bytes.iter().fold(0u32, |code, &byte| (code << 8) | u32::from(byte));
    Some((code, bytes.len() as CodeLen))
}

/// A hex string as UTF-16BE code units.
fn target_string(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match *pair {
            [high, low] => u16::from_be_bytes([high, low]),
            [single] => u16::from(single),
            _ => 0,
        })
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

/// Splits the tokens of one `begin…`/`end…` block off the front of `rest`.
fn block<'a>(rest: &mut &'a [Token], end: &[u8]) -> &'a [Token] {
    let len = rest
        .iter()
        .position(|token| matches!(token, Token::Keyword(keyword) if keyword == end))
        .unwrap_or(rest.len());
    let (body, tail) = rest.split_at(len);
    *rest = tail.get(1..).unwrap_or_default();
    body
}

fn hex_strings(body: &[Token]) -> impl Iterator<Item = &[u8]> {
    body.iter().filter_map(|token| match token {
        Token::Hex(bytes) => Some(&bytes[..]),
        _ => None,
    })
}

fn codespace_ranges(body: &[Token]) -> Vec<(SourceCode, SourceCode, CodeLen)> {
    let strings: Vec<_> = hex_strings(body).collect();
    strings
        .chunks_exact(2)
        .filter_map(|pair| {
            let (low, low_len) = source_code(pair[0])?;
            let (high, high_len) = source_code(pair[1])?;
            if low_len != high_len {
                warn!("cmap: codespace range <{}> <{}> mixes code lengths", hex(pair[0]), hex(pair[1]));
                return None;
            }
            Some((low, high, low_len))
        })
        .collect()
}

fn bf_chars(body: &[Token]) -> Vec<SourceCharMapping> {
    let strings: Vec<_> = hex_strings(body).collect();
    strings
        .chunks_exact(2)
        .filter_map(|pair| Some((source_code(pair[0])?, target_string(pair[1]))))
        .collect()
}

fn bf_ranges(body: &[Token]) -> Vec<SourceRangeMapping> {
    let mut mappings = Vec::new();
    let mut operands = body.iter().filter(|token| !matches!(token, Token::Other | Token::Keyword(_)));
    while let (Some(Token::Hex(low)), Some(Token::Hex(high)), Some(target)) =
        (operands.next(), operands.next(), operands.next())
    {
        let (Some((low, low_len)), Some((high, high_len))) = (source_code(low), source_code(high)) else {
            continue;
        };
        if low_len != high_len {
            warn!("cmap: bfrange {low:X}..{high:X} mixes code lengths");
            continue;
        }
        let targets = match target {
            Token::Hex(bytes) => vec![target_string(bytes)],
            Token::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().ok().map(target_string))
                .collect(),
            _ => continue,
        };
        mappings.push(((low, high, low_len), targets));
    }
    mappings
}

/// Collects the mapping blocks of a CMap program, in order.
pub(crate) fn parse(input: ParserInput) -> Result<Vec<CMapSection>, usize> {
    let (_, tokens) = tokens(input).map_err(|err| match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.offset,
        nom::Err::Incomplete(_) => 0,
    })?;

    let mut sections = Vec::new();
    let mut rest = &tokens[..];
    while let Some((first, tail)) = rest.split_first() {
        rest = tail;
        let Token::Keyword(keyword) = first else {
            continue;
        };
        match &keyword[..] {
            b"begincodespacerange" => sections.push(CMapSection::CsRange(codespace_ranges(block(
                &mut rest,
                b"endcodespacerange",
            )))),
            b"beginbfchar" => sections.push(CMapSection::BfChar(bf_chars(block(&mut rest, b"endbfchar")))),
            b"beginbfrange" => sections.push(CMapSection::BfRange(bf_ranges(block(&mut rest, b"endbfrange")))),
            _ => {}
        }
    }
    Ok(sections)
}

use crate::content::{Content, Operation};
use crate::cursor::ByteCursor;
use crate::error::ParseError as PdfParseError;
use crate::object::{Dictionary, Object, ObjectId, Span, Stream, StringFormat};
use crate::{Error, Result};
use log::warn;
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of, space0};
use nom::combinator::{map, map_opt, opt, recognize, verify};
use nom::error::{ErrorKind, FromExternalError, ParseError};
use nom::multi::{fold_many0, many0, many0_count};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{AsChar, IResult, Input, Parser};
use nom_locate::LocatedSpan;

pub(crate) mod cmap_parser;

/// Deepest nesting of literal string parentheses.
pub const MAX_BRACKET: usize = 100;

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;

/// Resolves an indirect `/Length` while a stream is being parsed.
pub type LengthResolver<'a> = &'a dyn Fn(ObjectId) -> Result<i64>;

/// Error carried through the grammar: the furthest offset any alternative reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NomError {
    pub offset: usize,
}

impl<'a> ParseError<ParserInput<'a>> for NomError {
    fn from_error_kind(input: ParserInput<'a>, _kind: ErrorKind) -> Self {
        NomError {
            offset: input.location_offset(),
        }
    }

    fn append(_input: ParserInput<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn or(self, other: Self) -> Self {
        if other.offset > self.offset { other } else { self }
    }
}

impl<'a, E> FromExternalError<ParserInput<'a>, E> for NomError {
    fn from_external_error(input: ParserInput<'a>, kind: ErrorKind, _e: E) -> Self {
        NomError::from_error_kind(input, kind)
    }
}

pub(crate) type NomResult<'a, O> = IResult<ParserInput<'a>, O, NomError>;

#[inline]
fn parse_ascii<T: FromStr>(digits: &[u8]) -> Option<T> {
    str::from_utf8(digits).ok()?.parse().ok()
}

fn nom_offset(err: nom::Err<NomError>, fallback: usize) -> usize {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.offset,
        nom::Err::Incomplete(_) => fallback,
    }
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

pub(crate) fn comment(input: ParserInput) -> NomResult<()> {
    map(
        (tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), opt(eol)),
        |_| (),
    )
    .parse(input)
}

#[inline]
fn is_whitespace(c: u8) -> bool {
    crate::cursor::is_whitespace(c)
}

#[inline]
fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
pub(crate) fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

pub(crate) fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    )
    .parse(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    map_opt(recognize(pair(opt(one_of("+-")), digit1)), |digits: ParserInput| {
        parse_ascii(digits.fragment())
    })
    .parse(input)
}

fn real(input: ParserInput) -> NomResult<f32> {
    map_opt(
        recognize(pair(
            opt(one_of("+-")),
            alt((
                map((digit1, tag(&b"."[..]), digit0), |_| ()),
                map(pair(tag(&b"."[..]), digit1), |_| ()),
            )),
        )),
        |digits: ParserInput| parse_ascii(digits.fragment()),
    )
    .parse(input)
}

fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_opt(
        verify(take(2usize), |h: &ParserInput| h.fragment().iter().all(u8::is_ascii_hexdigit)),
        |x: ParserInput| u8::from_str_radix(str::from_utf8(x.fragment()).ok()?, 16).ok(),
    )
    .parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_opt(
        take_while_m_n(1, 3, AsChar::is_oct_digit),
        // Overflow is ignored: \777 keeps only the low byte.
        |x: ParserInput| u16::from_str_radix(str::from_utf8(x.fragment()).ok()?, 8).ok().map(|o| o as u8),
    )
    .parse(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                let c = c.fragment()[0];
                (c != b'#' && is_regular(c)).then_some(c)
            }),
        ))),
    )
    .parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c.fragment()[0])),
        )),
    )
    .parse(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl InnerLiteralString<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) | InnerLiteralString::Eol(s) => output.extend_from_slice(s.fragment()),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )
        .parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            let err = NomError::from_error_kind(input, ErrorKind::TooLarge);
            if input.fragment().starts_with(b"(") {
                Err(nom::Err::Failure(err))
            } else {
                Err(nom::Err::Error(err))
            }
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )
            .parse(input)
        }
    }
}

pub(crate) fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| (c.fragment()[0] as char).to_digit(16).map(|d| d as u8)).parse(input)
}

pub(crate) fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            if let Some(last) = out.last_mut() {
                                *last |= c;
                            }
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    )
    .parse(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(&b"true"[..]), |_| Object::Boolean(true)),
        map(tag(&b"false"[..]), |_| Object::Boolean(false)),
    ))
    .parse(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(&b"null"[..]), |_| Object::Null).parse(input)
}

pub(crate) fn array(input: ParserInput) -> NomResult<Vec<Object>> {
    delimited(pair(tag(&b"["[..]), space), many0(_direct_object), tag(&b"]"[..])).parse(input)
}

pub(crate) fn dictionary(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"<<"[..]), space), inner_dictionary, tag(&b">>"[..])).parse(input)
}

fn inner_dictionary(input: ParserInput) -> NomResult<Dictionary> {
    fold_many0(
        pair(terminated(name, space), _direct_object),
        Dictionary::new,
        |mut dict, (key, value)| {
            dict.set(key, value);
            dict
        },
    )
    .parse(input)
}

fn unsigned_int<I: FromStr>(input: ParserInput) -> NomResult<I> {
    map_opt(digit1, |digits: ParserInput| parse_ascii(digits.fragment())).parse(input)
}

fn object_id(input: ParserInput) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space)).parse(input)
}

fn reference(input: ParserInput) -> NomResult<Object> {
    map(terminated(object_id, tag(&b"R"[..])), Object::Reference).parse(input)
}

fn _direct_objects(input: ParserInput) -> NomResult<Object> {
    alt((
        null,
        boolean,
        reference,
        map(real, Object::Real),
        map(integer, Object::Integer),
        map(name, Object::Name),
        map(literal_string, Object::string_literal),
        hexadecimal_string,
        map(array, Object::Array),
        map(dictionary, Object::Dictionary),
    ))
    .parse(input)
}

fn _direct_object(input: ParserInput) -> NomResult<Object> {
    terminated(_direct_objects, space).parse(input)
}

fn stream_keyword(input: ParserInput) -> NomResult<()> {
    map((space, tag(&b"stream"[..]), space0, eol), |_| ()).parse(input)
}

fn end_stream_keyword(input: ParserInput) -> NomResult<()> {
    map((opt(eol), space0, tag(&b"endstream"[..])), |_| ()).parse(input)
}

/// Parses one object at the cursor and moves the cursor past it.
///
/// A dictionary directly followed by the `stream` keyword becomes a [`Stream`] whose data is a
/// zero-copy slice of the cursor's buffer. An indirect `/Length` is looked up through `resolver`.
pub fn parse_object(cursor: &mut ByteCursor, resolver: Option<LengthResolver>) -> Result<Object> {
    let buffer = cursor.source().clone();
    let input = ParserInput::new_extra(&buffer[..], "object").take_from(cursor.position());
    let (input, _) = space(input).map_err(|_| cursor.unexpected_token())?;
    if input.fragment().is_empty() {
        return Err(PdfParseError::EndOfInput.into());
    }
    let start = input.location_offset();

    let (rest, object) = _direct_objects(input).map_err(|err| cursor.unexpected_token_at(nom_offset(err, start)))?;

    let dict = match object {
        Object::Dictionary(dict) => dict,
        other => {
            cursor.seek(rest.location_offset())?;
            return Ok(other);
        }
    };

    let data = match stream_keyword(rest) {
        Ok((data, _)) => data,
        Err(_) => {
            cursor.seek(rest.location_offset())?;
            return Ok(Object::Dictionary(dict));
        }
    };
    let data_start = data.location_offset();

    let length = match dict.get(b"Length") {
        Ok(Object::Integer(length)) => Some(*length),
        Ok(Object::Reference(id)) => match resolver {
            Some(resolve) => match resolve(*id) {
                Ok(length) => Some(length),
                Err(err @ Error::ReferenceCycle(_)) => return Err(err),
                Err(err) => {
                    warn!("stream at byte {data_start}: cannot resolve /Length {} {} R: {err}", id.0, id.1);
                    None
                }
            },
            None => None,
        },
        _ => None,
    };

    let sized = length
        .and_then(|length| usize::try_from(length).ok())
        .filter(|&length| data_start.checked_add(length).is_some_and(|end| end <= buffer.len()))
        .and_then(|length| {
            let (after, content) = take::<_, _, NomError>(length).parse(data).ok()?;
            let (after, _) = end_stream_keyword(after).ok()?;
            Some((content.location_offset() + content.fragment().len(), after.location_offset()))
        });

    let (data_end, resume) = match sized {
        Some(found) => found,
        None => {
            if length.is_some() {
                warn!("stream at byte {data_start}: /Length does not reach endstream, searching for it instead");
            } else {
                warn!("stream at byte {data_start} has no usable /Length, searching for endstream");
            }
            cursor.seek(data_start)?;
            let keyword = cursor
                .find_pattern(b"endstream")
                .ok_or_else(|| PdfParseError::InvalidStream(format!("missing endstream after byte {data_start}")))?;
            let mut data_end = keyword;
            if data_end > data_start && buffer[data_end - 1] == b'\n' {
                data_end -= 1;
            }
            if data_end > data_start && buffer[data_end - 1] == b'\r' {
                data_end -= 1;
            }
            (data_end, keyword + b"endstream".len())
        }
    };

    cursor.seek(resume)?;
    let span = Span::new(data_start, data_end - data_start);
    Ok(Object::Stream(Stream::from_source(dict, buffer.slice(data_start..data_end), span)))
}

/// Parses `N G obj <object> endobj` at the cursor.
pub fn parse_indirect_object(
    cursor: &mut ByteCursor, expected_id: Option<ObjectId>, resolver: Option<LengthResolver>,
) -> Result<(ObjectId, Object)> {
    let offset = cursor.position();
    let buffer = cursor.source().clone();
    let input = ParserInput::new_extra(&buffer[..], "indirect object").take_from(offset);
    let (body, id) = preceded(space, terminated(object_id, pair(tag(&b"obj"[..]), space)))
        .parse(input)
        .map_err(|_| Error::IndirectObject { offset })?;
    if let Some(expected_id) = expected_id {
        if id != expected_id {
            return Err(Error::ObjectIdMismatch);
        }
    }

    cursor.seek(body.location_offset())?;
    let object = parse_object(cursor, resolver)?;

    let tail = ParserInput::new_extra(&buffer[..], "indirect object").take_from(cursor.position());
    if let Ok((after, _)) = (space, tag::<_, _, NomError>(&b"endobj"[..])).parse(tail) {
        cursor.seek(after.location_offset())?;
    }
    Ok((id, object))
}

/// Parses a single direct object from a standalone buffer.
pub fn direct_object(input: &[u8]) -> Option<Object> {
    _direct_object(ParserInput::new_extra(input, "direct object"))
        .ok()
        .map(|(_, object)| object)
}

/// Reads the `%PDF-x.y` version at the start of `input`.
pub fn header(input: &[u8]) -> Option<String> {
    delimited(
        tag(&b"%PDF-"[..]),
        take_while(|c: u8| !b"\r\n".contains(&c) && !is_whitespace(c)),
        pair(take_while(|c: u8| !b"\r\n".contains(&c)), many0_count(eol)),
    )
    .parse(ParserInput::new_extra(input, "header"))
    .ok()
    .and_then(|(_, version)| str::from_utf8(version.fragment()).ok().map(Into::into))
}

// Content stream tokens.

fn content_space(input: ParserInput) -> NomResult<()> {
    space(input)
}

fn operator(input: ParserInput) -> NomResult<String> {
    map_opt(
        take_while1(|c: u8| c.is_ascii_alphanumeric() || b"*'\"".contains(&c)),
        |op: ParserInput| str::from_utf8(op.fragment()).ok().map(Into::into),
    )
    .parse(input)
}

fn operand(input: ParserInput) -> NomResult<Object> {
    terminated(
        alt((
            null,
            boolean,
            map(real, Object::Real),
            map(integer, Object::Integer),
            map(name, Object::Name),
            map(literal_string, Object::string_literal),
            hexadecimal_string,
            map(array, Object::Array),
            map(dictionary, Object::Dictionary),
        )),
        content_space,
    )
    .parse(input)
}

fn operation(input: ParserInput) -> NomResult<Operation> {
    map(
        alt((inline_image, terminated(pair(many0(operand), operator), content_space))),
        |(operands, operator)| Operation { operator, operands },
    )
    .parse(input)
}

/// `BI <dict> ID <data> EI`. The image data is skipped; only the dictionary is kept.
fn inline_image(input: ParserInput) -> NomResult<(Vec<Object>, String)> {
    let (input, _) = pair(tag(&b"BI"[..]), content_space).parse(input)?;
    let (input, dict) = inner_dictionary.parse(input)?;
    let (data, _) = pair(tag(&b"ID"[..]), take_while_m_n(0, 1, is_whitespace)).parse(input)?;

    let bytes = data.fragment();
    let end = (0..bytes.len().saturating_sub(1))
        .find(|&i| {
            bytes[i..].starts_with(b"EI")
                && i > 0
                && is_whitespace(bytes[i - 1])
                && bytes.get(i + 2).is_none_or(|&c| !is_regular(c))
        })
        .ok_or_else(|| nom::Err::Failure(NomError::from_error_kind(data, ErrorKind::TakeUntil)))?;
    let (input, _) = take(end + 2).parse(data)?;
    let (input, _) = content_space(input)?;
    Ok((input, (vec![Object::Dictionary(dict)], String::from("BI"))))
}

fn _content(input: ParserInput) -> NomResult<Vec<Operation>> {
    preceded(content_space, many0(operation)).parse(input)
}

/// Splits a content stream into operations.
pub fn content(input: &[u8]) -> Result<Content> {
    let span = ParserInput::new_extra(input, "content");
    let (rest, operations) = _content(span).map_err(|err| {
        ByteCursor::new(input.to_vec()).unexpected_token_at(nom_offset(err, 0))
    })?;
    if !rest.fragment().is_empty() {
        return Err(ByteCursor::new(input.to_vec())
            .unexpected_token_at(rest.location_offset())
            .into());
    }
    Ok(Content { operations })
}

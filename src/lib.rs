#![doc = include_str!("../README.md")]

#[macro_use]
mod object;
pub use crate::object::{Dictionary, FromObject, Name, Object, ObjectId, PdfString, Span, Stream, StringFormat};

mod content;
pub use crate::content::{Content, DocumentText, Operation};

mod cursor;
pub use crate::cursor::ByteCursor;

mod matcher;
pub use crate::matcher::{KmpMatcher, Matcher, MatcherKind, NaiveMatcher, SundayMatcher};

mod document;
pub use crate::document::{Catalog, EncryptionInfo, LinearizationInfo, PdfDocument, Trailer};

mod error;
pub use error::{DecompressError, Error, ParseError, Result, XrefError};

pub mod encodings;
pub mod encryption;
pub use encryption::Permissions;

pub mod filters;
mod font;
pub use crate::font::Font;

mod object_stream;
pub use crate::object_stream::ObjectStream;

mod object_table;
pub use crate::object_table::ObjectTable;

mod page;
pub use crate::page::{Page, PageBox};

pub mod parser;
mod reader;
pub use crate::reader::{DEFAULT_STARTXREF_WINDOW, LoadOptions};

pub mod xref;
pub use crate::xref::{Xref, XrefEntry};

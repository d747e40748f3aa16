use crate::{Error, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use std::cell::OnceCell;
use std::fmt;
use std::str;

/// Object identifier consists of two parts: object number and generation number.
pub type ObjectId = (u32, u16);

/// Where a value was found in the source buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Span {
        Span { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Dictionary object.
#[derive(Clone, Default, PartialEq)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object.
///
/// All streams are indirect objects. The raw content is a slice of the document buffer, or
/// freshly allocated bytes once decrypted. Filter decoding happens on first access.
#[derive(Clone)]
pub struct Stream {
    /// Associated stream dictionary
    pub dict: Dictionary,
    /// Raw (still filtered) contents of the stream
    pub content: Bytes,
    /// Position of the raw data in the source buffer.
    pub span: Option<Span>,
    decoded: OnceCell<Vec<u8>>,
}

/// Basic PDF object types defined in an enum.
///
/// Equality compares values; where a value came from is tracked by [`Span`]s kept alongside.
#[derive(Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f32),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// String objects can be written in two formats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(number: i64) -> Self {
        Object::Integer(number)
    }
}

macro_rules! from_smaller_ints {
    ($( $Int: ty )+) => {
        $(
            impl From<$Int> for Object {
                fn from(number: $Int) -> Self {
                    Object::Integer(i64::from(number))
                }
            }
        )+
    }
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f32> for Object {
    fn from(number: f32) -> Self {
        Object::Real(number)
    }
}

impl From<String> for Object {
    fn from(name: String) -> Self {
        Object::Name(name.into_bytes())
    }
}

impl<'a> From<&'a str> for Object {
    fn from(name: &'a str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn enum_variant(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(..) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    pub(crate) fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.enum_variant(),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Object::Boolean(value) => Ok(value),
            _ => Err(self.type_error("Boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            Object::Integer(value) => Ok(value),
            _ => Err(self.type_error("Integer")),
        }
    }

    /// Numeric value of an Integer or a Real.
    pub fn as_float(&self) -> Result<f32> {
        match *self {
            Object::Integer(value) => Ok(value as f32),
            Object::Real(value) => Ok(value),
            _ => Err(self.type_error("Integer or Real")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("Name")),
        }
    }

    pub fn as_name_str(&self) -> Result<&str> {
        Ok(str::from_utf8(self.as_name()?)?)
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match self {
            Object::String(string, _) => Ok(string),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_str_mut(&mut self) -> Result<&mut Vec<u8>> {
        match self {
            Object::String(string, _) => Ok(string),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match *self {
            Object::Reference(id) => Ok(id),
            _ => Err(self.type_error("Reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn type_name(&self) -> Result<&[u8]> {
        match self {
            Object::Dictionary(dict) => dict.type_name(),
            Object::Stream(stream) => stream.dict.type_name(),
            _ => Err(self.type_error("Dictionary or Stream")),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => f.write_str("null"),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Integer(value) => write!(f, "{value}"),
            Object::Real(value) => write!(f, "{value}"),
            Object::Name(name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(text, StringFormat::Literal) => write!(f, "({})", String::from_utf8_lossy(text)),
            Object::String(text, StringFormat::Hexadecimal) => {
                f.write_str("<")?;
                for byte in text {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str(">")
            }
            Object::Array(array) => {
                let items = array.iter().map(|item| format!("{item:?}")).collect::<Vec<String>>();
                write!(f, "[{}]", items.join(" "))
            }
            Object::Dictionary(dict) => write!(f, "{dict:?}"),
            Object::Stream(stream) => write!(f, "{:?}stream...endstream", stream.dict),
            Object::Reference(id) => write!(f, "{} {} R", id.0, id.1),
        }
    }
}

/// A name value borrowed from an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Name<'a>(pub &'a [u8]);

/// The bytes of a string value borrowed from an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdfString<'a>(pub &'a [u8]);

/// Typed extraction of a dictionary value, used by [`Dictionary::get_as`].
pub trait FromObject<'a>: Sized {
    fn from_object(object: &'a Object) -> Result<Self>;
}

impl<'a> FromObject<'a> for &'a Object {
    fn from_object(object: &'a Object) -> Result<Self> {
        Ok(object)
    }
}

impl FromObject<'_> for i64 {
    fn from_object(object: &Object) -> Result<Self> {
        object.as_i64()
    }
}

impl FromObject<'_> for f32 {
    fn from_object(object: &Object) -> Result<Self> {
        object.as_float()
    }
}

impl FromObject<'_> for bool {
    fn from_object(object: &Object) -> Result<Self> {
        object.as_bool()
    }
}

impl FromObject<'_> for ObjectId {
    fn from_object(object: &Object) -> Result<Self> {
        object.as_reference()
    }
}

impl<'a> FromObject<'a> for Name<'a> {
    fn from_object(object: &'a Object) -> Result<Self> {
        object.as_name().map(Name)
    }
}

impl<'a> FromObject<'a> for PdfString<'a> {
    fn from_object(object: &'a Object) -> Result<Self> {
        object.as_str().map(PdfString)
    }
}

impl<'a> FromObject<'a> for &'a Vec<Object> {
    fn from_object(object: &'a Object) -> Result<Self> {
        object.as_array()
    }
}

impl<'a> FromObject<'a> for &'a Dictionary {
    fn from_object(object: &'a Object) -> Result<Self> {
        object.as_dict()
    }
}

impl<'a> FromObject<'a> for &'a Stream {
    fn from_object(object: &'a Object) -> Result<Self> {
        object.as_stream()
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(IndexMap::new())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    /// Fetches a required entry as `T`; a missing key or a different variant is an error.
    pub fn get_as<'a, T: FromObject<'a>>(&'a self, key: &[u8]) -> Result<T> {
        T::from_object(self.get(key)?)
    }

    /// Fetches an optional entry as `T`; a present entry of a different variant is still an error.
    pub fn try_get_as<'a, T: FromObject<'a>>(&'a self, key: &[u8]) -> Result<Option<T>> {
        self.0.get(key).map(T::from_object).transpose()
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn type_name(&self) -> Result<&[u8]> {
        self.get(b"Type").and_then(Object::as_name)
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type").and_then(Object::as_name).ok() == Some(type_name)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, Vec<u8>, Object> {
        self.0.iter_mut()
    }
}

#[macro_export]
macro_rules! dictionary {
    () => {
        $crate::Dictionary::new()
    };
    ($( $key: expr => $value: expr ),+ ,) => {
        $crate::dictionary!( $($key => $value),+ )
    };
    ($( $key: expr => $value: expr ),*) => {{
        let mut dict = $crate::Dictionary::new();
        $(
            dict.set($key, $value);
        )*
        dict
    }}
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .into_iter()
            .map(|(key, value)| format!("/{} {:?}", String::from_utf8_lossy(key), value))
            .collect::<Vec<String>>();
        write!(f, "<<{}>>", entries.concat())
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, Object)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl Stream {
    /// Builds a stream around `content`, setting `/Length` to match.
    pub fn new(mut dict: Dictionary, content: impl Into<Bytes>) -> Stream {
        let content = content.into();
        dict.set("Length", content.len() as i64);
        Stream {
            dict,
            content,
            span: None,
            decoded: OnceCell::new(),
        }
    }

    /// A stream whose raw data was sliced out of the source buffer at `span`.
    pub(crate) fn from_source(dict: Dictionary, content: Bytes, span: Span) -> Stream {
        Stream {
            dict,
            content,
            span: Some(span),
            decoded: OnceCell::new(),
        }
    }

    /// Filter names in decoding order; empty when the stream is not filtered.
    pub fn filters(&self) -> Result<Vec<&[u8]>> {
        let filter = match self.dict.get(b"Filter") {
            Ok(filter) => filter,
            Err(_) => return Ok(vec![]),
        };

        match filter {
            Object::Name(name) => Ok(vec![name]),
            Object::Array(names) => names.iter().map(Object::as_name).collect(),
            other => Err(other.type_error("Name or Array")),
        }
    }

    /// Decode parameters for each filter, aligned with [`Stream::filters`].
    pub fn decode_parms(&self) -> Vec<Option<&Dictionary>> {
        let count = self.filters().map(|filters| filters.len()).unwrap_or(0);
        match self.dict.get(b"DecodeParms") {
            Ok(Object::Dictionary(params)) => {
                let mut out = vec![None; count];
                if let Some(first) = out.first_mut() {
                    *first = Some(params);
                }
                out
            }
            Ok(Object::Array(params)) => (0..count)
                .map(|i| params.get(i).and_then(|p| p.as_dict().ok()))
                .collect(),
            _ => vec![None; count],
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.dict.has(b"Filter")
    }

    /// The stream contents after all filters are undone. Computed once.
    pub fn decoded_content(&self) -> Result<&[u8]> {
        if !self.is_compressed() {
            return Ok(&self.content);
        }
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        let decoded = crate::filters::decode_stream(self)?;
        Ok(self.decoded.get_or_init(|| decoded))
    }

    /// Replaces the raw content, keeping `/Length` in sync and dropping any cached decoding.
    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        self.content = content.into();
        self.dict.set("Length", self.content.len() as i64);
        self.decoded = OnceCell::new();
    }

    /// Replaces the raw content with already decrypted bytes. `/Length` stays as parsed.
    pub(crate) fn set_decrypted_content(&mut self, content: Vec<u8>) {
        self.content = Bytes::from(content);
        self.decoded = OnceCell::new();
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.content == other.content
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("dict", &self.dict)
            .field("length", &self.content.len())
            .field("span", &self.span)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_dictionary_access() {
        let dict = dictionary! {
            "Type" => "Page",
            "Count" => 3,
            "Parent" => (2, 0),
            "Scale" => 1.5,
            "Kids" => vec![Object::Reference((4, 0))],
        };

        assert_eq!(dict.get_as::<Name>(b"Type").unwrap(), Name(b"Page"));
        assert_eq!(dict.get_as::<i64>(b"Count").unwrap(), 3);
        assert_eq!(dict.get_as::<f32>(b"Count").unwrap(), 3.0);
        assert_eq!(dict.get_as::<f32>(b"Scale").unwrap(), 1.5);
        assert_eq!(dict.get_as::<ObjectId>(b"Parent").unwrap(), (2, 0));
        assert_eq!(dict.get_as::<&Vec<Object>>(b"Kids").unwrap().len(), 1);

        assert!(matches!(dict.get_as::<i64>(b"Type"), Err(Error::ObjectType { found: "Name", .. })));
        assert!(matches!(dict.get_as::<i64>(b"Missing"), Err(Error::DictKey(key)) if key == "Missing"));

        assert_eq!(dict.try_get_as::<i64>(b"Missing").unwrap(), None);
        assert_eq!(dict.try_get_as::<i64>(b"Count").unwrap(), Some(3));
        assert!(dict.try_get_as::<&Dictionary>(b"Count").is_err());
    }

    #[test]
    fn equality_is_by_value() {
        let a = Object::Array(vec![5.into(), Object::string_literal("x")]);
        let b = Object::Array(vec![5.into(), Object::string_literal("x")]);
        assert_eq!(a, b);

        let dict = dictionary! { "Length" => 3 };
        let first = Stream::from_source(dict.clone(), Bytes::from_static(b"abc"), Span::new(10, 3));
        let second = Stream::from_source(dict, Bytes::from_static(b"abc"), Span::new(90, 3));
        assert_eq!(first, second);
    }

    #[test]
    fn stream_filters_and_params() {
        let stream = Stream::new(
            dictionary! {
                "Filter" => vec![Object::from("ASCIIHexDecode"), Object::from("FlateDecode")],
                "DecodeParms" => vec![Object::Null, Object::Dictionary(dictionary! { "Predictor" => 12 })],
            },
            vec![],
        );
        assert_eq!(stream.filters().unwrap(), vec![&b"ASCIIHexDecode"[..], &b"FlateDecode"[..]]);
        let params = stream.decode_parms();
        assert!(params[0].is_none());
        assert_eq!(params[1].unwrap().get_as::<i64>(b"Predictor").unwrap(), 12);
    }

    #[test]
    fn unfiltered_stream_decodes_to_itself() {
        let stream = Stream::new(Dictionary::new(), b"BT ET".to_vec());
        assert_eq!(stream.decoded_content().unwrap(), b"BT ET");
        assert_eq!(stream.dict.get_as::<i64>(b"Length").unwrap(), 5);
    }
}

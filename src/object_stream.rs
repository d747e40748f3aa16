use crate::error::ParseError;
use crate::parser;
use crate::{Error, Object, ObjectId, Result, Stream};
use std::collections::BTreeMap;
use std::str::FromStr;

use log::warn;

/// The objects packed in a `/Type /ObjStm` stream.
#[derive(Debug)]
pub struct ObjectStream {
    pub objects: BTreeMap<ObjectId, Object>,
    /// The object stream this one extends, from `/Extends`.
    pub extends: Option<ObjectId>,
}

impl ObjectStream {
    /// Unpacks a decrypted object stream. Filters are undone here.
    pub fn new(stream: &Stream) -> Result<ObjectStream> {
        let extends = stream.dict.try_get_as::<ObjectId>(b"Extends")?;
        let content = stream.decoded_content()?;

        if content.is_empty() {
            return Ok(ObjectStream {
                objects: BTreeMap::new(),
                extends,
            });
        }

        let first_offset = stream.dict.get(b"First").and_then(Object::as_i64)?;
        let first_offset = usize::try_from(first_offset)
            .map_err(|_| ParseError::InvalidStream(format!("object stream /First is {first_offset}")))?;
        let index_block = content.get(..first_offset).ok_or(Error::InvalidOffset(first_offset))?;

        let numbers_str = std::str::from_utf8(index_block)?;
        let numbers: Vec<_> = numbers_str
            .split_whitespace()
            .map(|number| u32::from_str(number).ok())
            .collect();
        let len = numbers.len() / 2 * 2; // Ensure only pairs.

        let n = stream.dict.get(b"N").and_then(Object::as_i64)?;
        if i64::try_from(numbers.len()).ok() != n.checked_mul(2) {
            warn!("object stream: /N is {n} but the header lists {} objects", numbers.len() / 2);
        }

        let objects = numbers[..len]
            .chunks(2)
            .filter_map(|chunk| {
                let id = chunk[0]?;
                let offset = first_offset.checked_add(chunk[1]? as usize)?;

                if offset >= content.len() {
                    warn!("object stream: object {id} has out-of-bounds offset {offset}");
                    return None;
                }
                let object = parser::direct_object(&content[offset..]);
                if object.is_none() {
                    warn!("object stream: object {id} at offset {offset} could not be parsed");
                }
                Some(((id, 0), object?))
            })
            .collect();

        Ok(ObjectStream { objects, extends })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn packed(objects: &[(u32, &str)]) -> (String, usize) {
        let mut header = String::new();
        let mut body = String::new();
        for (id, text) in objects {
            header.push_str(&format!("{id} {} ", body.len()));
            body.push_str(text);
            body.push('\n');
        }
        let first = header.len();
        (header + &body, first)
    }

    #[test]
    fn unpacks_flate_compressed_objects() {
        let (content, first) = packed(&[(4, "<</Type /Font /BaseFont /Helvetica>>"), (5, "[1 2 3]"), (6, "(text)")]);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        let stream = Stream::new(
            dictionary! {
                "Type" => "ObjStm",
                "N" => 3,
                "First" => first as i64,
                "Filter" => "FlateDecode",
                "Extends" => Object::Reference((9, 0)),
            },
            encoder.finish().unwrap(),
        );

        let object_stream = ObjectStream::new(&stream).unwrap();
        assert_eq!(object_stream.objects.len(), 3);
        assert_eq!(object_stream.extends, Some((9, 0)));
        let font = object_stream.objects[&(4, 0)].as_dict().unwrap();
        assert!(font.has_type(b"Font"));
        assert_eq!(object_stream.objects[&(5, 0)].as_array().unwrap().len(), 3);
        assert_eq!(object_stream.objects[&(6, 0)].as_str().unwrap(), b"text");
    }

    #[test]
    fn skips_out_of_bounds_entries() {
        let header = "1 0 2 500 ";
        let stream = Stream::new(
            dictionary! { "Type" => "ObjStm", "N" => 2, "First" => header.len() as i64 },
            format!("{header}true\n").into_bytes(),
        );
        let object_stream = ObjectStream::new(&stream).unwrap();
        assert_eq!(object_stream.objects.len(), 1);
        assert_eq!(object_stream.objects[&(1, 0)], Object::Boolean(true));
    }

    #[test]
    fn first_beyond_content_is_an_error() {
        let stream = Stream::new(dictionary! { "Type" => "ObjStm", "N" => 1, "First" => 400 }, b"1 0 null".to_vec());
        assert!(matches!(ObjectStream::new(&stream), Err(Error::InvalidOffset(400))));
    }

    #[test]
    fn negative_first_is_reported() {
        let stream = Stream::new(dictionary! { "Type" => "ObjStm", "N" => 1, "First" => -3 }, b"1 0 null".to_vec());
        match ObjectStream::new(&stream) {
            Err(Error::Parse(ParseError::InvalidStream(message))) => assert!(message.contains("-3")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

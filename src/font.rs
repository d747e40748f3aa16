use std::cell::OnceCell;

use log::{debug, warn};

use crate::encodings::cmap::ToUnicodeCMap;
use crate::encodings::CharacterMapper;
use crate::object_table::ObjectTable;
use crate::{Dictionary, Object, Result, Stream};

/// A font resource of a page, keyed in `/Font` by its resource name.
#[derive(Debug, Clone)]
pub struct Font {
    /// The resource name, e.g. `F1`.
    pub name: String,
    pub base_font: Option<String>,
    pub subtype: Option<String>,
    /// The `/Encoding` name. Encoding dictionaries and CMap streams are not named here.
    pub encoding: Option<String>,
    pub dict: Dictionary,
    to_unicode: Option<Stream>,
    mapper: OnceCell<CharacterMapper>,
}

fn name_string(dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key)
        .and_then(Object::as_name)
        .ok()
        .map(|name| String::from_utf8_lossy(name).into_owned())
}

impl Font {
    /// Resolves what the font needs from the object table. Decoding waits for first use.
    pub fn new(name: String, dict: Dictionary, objects: &ObjectTable) -> Result<Font> {
        let to_unicode = match dict.get(b"ToUnicode") {
            Ok(object) => match objects.dereference(object)? {
                Object::Stream(stream) => Some(stream.clone()),
                other => {
                    // `/Identity` and friends name predefined CMaps.
                    debug!("font {name}: /ToUnicode is a {}, ignoring", other.enum_variant());
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Font {
            base_font: name_string(&dict, b"BaseFont"),
            subtype: name_string(&dict, b"Subtype"),
            encoding: name_string(&dict, b"Encoding"),
            name,
            dict,
            to_unicode,
            mapper: OnceCell::new(),
        })
    }

    /// How this font's string bytes become text. Built on first call.
    pub fn character_mapper(&self) -> Result<&CharacterMapper> {
        if let Some(mapper) = self.mapper.get() {
            return Ok(mapper);
        }

        let mapper = match &self.to_unicode {
            Some(stream) => {
                let cmap = ToUnicodeCMap::parse(stream.decoded_content()?)?;
                CharacterMapper::ToUnicode(cmap)
            }
            None => match self.encoding.as_deref() {
                Some("WinAnsiEncoding") => CharacterMapper::WinAnsi,
                Some("Identity-H") | Some("Identity-V") if self.subtype.as_deref() == Some("Type0") => {
                    warn!("font {}: composite font without /ToUnicode, bytes are kept as is", self.name);
                    CharacterMapper::Identity
                }
                _ => CharacterMapper::Identity,
            },
        };
        Ok(self.mapper.get_or_init(|| mapper))
    }

    /// Decodes a string operand with this font's mapper.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(self.character_mapper()?.decode(bytes))
    }
}

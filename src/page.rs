use std::cell::OnceCell;
use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};

use crate::content::{self, Content, DocumentText};
use crate::font::Font;
use crate::object_table::ObjectTable;
use crate::{Dictionary, Object, ObjectId, Result, Stream};

/// A page rectangle in default user space units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageBox {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl PageBox {
    /// Reads a `[llx lly urx ury]` rectangle. Any two diagonally opposite corners are accepted.
    pub fn from_object(object: &Object, objects: &ObjectTable) -> Result<PageBox> {
        let items = objects.dereference(object)?.as_array()?;
        let mut values = [0.0f32; 4];
        if items.len() != 4 {
            return Err(crate::Error::ObjectType {
                expected: "Array of 4 numbers",
                found: "Array",
            });
        }
        for (value, item) in values.iter_mut().zip(items) {
            *value = objects.dereference(item)?.as_float()?;
        }
        let [x0, y0, x1, y1] = values;
        Ok(PageBox {
            left: x0.min(x1),
            bottom: y0.min(y1),
            right: x0.max(x1),
            top: y0.max(y1),
        })
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }
}

/// A leaf of the page tree with its inherited attributes resolved.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based position in the page tree.
    pub number: u32,
    pub id: ObjectId,
    /// The content streams, in drawing order.
    pub contents: Vec<ObjectId>,
    pub resources: Dictionary,
    pub fonts: BTreeMap<String, Font>,
    pub media_box: Option<PageBox>,
    pub crop_box: Option<PageBox>,
    pub rotate: Option<i64>,
    content_streams: Vec<Stream>,
    texts: OnceCell<Vec<DocumentText>>,
}

impl Page {
    /// The decoded content streams joined into one buffer.
    pub fn content(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        for stream in &self.content_streams {
            content.extend_from_slice(stream.decoded_content()?);
            // Streams may split tokens only at whitespace.
            content.push(b'\n');
        }
        Ok(content)
    }

    /// The text objects of this page in content order. Computed on first call.
    pub fn get_texts(&self) -> Result<&[DocumentText]> {
        if let Some(texts) = self.texts.get() {
            return Ok(texts);
        }
        let content = Content::decode(&self.content()?)?;
        let texts = content::replay(&content, &self.fonts)?;
        debug!("page {}: {} text objects", self.number, texts.len());
        Ok(self.texts.get_or_init(|| texts))
    }

    /// All text of the page, one text object per line.
    pub fn extract_text(&self) -> Result<String> {
        let texts = self.get_texts()?;
        Ok(texts.iter().map(|text| text.value.as_str()).collect::<Vec<_>>().join("\n"))
    }
}

/// Page attributes a `/Pages` node passes down to its kids.
#[derive(Debug, Clone, Default)]
struct Inherited {
    resources: Option<Dictionary>,
    media_box: Option<PageBox>,
    crop_box: Option<PageBox>,
    rotate: Option<i64>,
}

impl Inherited {
    fn overlay(&self, node: &Dictionary, objects: &ObjectTable) -> Result<Inherited> {
        let mut inherited = self.clone();
        if let Ok(resources) = node.get(b"Resources") {
            inherited.resources = Some(objects.dereference(resources)?.as_dict()?.clone());
        }
        if let Some(media_box) = page_box(node, b"MediaBox", objects) {
            inherited.media_box = Some(media_box);
        }
        if let Some(crop_box) = page_box(node, b"CropBox", objects) {
            inherited.crop_box = Some(crop_box);
        }
        if let Ok(rotate) = node.get(b"Rotate") {
            inherited.rotate = Some(objects.dereference(rotate)?.as_i64()?);
        }
        Ok(inherited)
    }
}

fn page_box(node: &Dictionary, key: &[u8], objects: &ObjectTable) -> Option<PageBox> {
    let object = node.get(key).ok()?;
    match PageBox::from_object(object, objects) {
        Ok(page_box) => Some(page_box),
        Err(err) => {
            warn!("ignoring malformed /{}: {err}", String::from_utf8_lossy(key));
            None
        }
    }
}

fn references(items: &[Object]) -> Result<Vec<ObjectId>> {
    items.iter().map(Object::as_reference).collect()
}

fn content_ids(page: &Dictionary, objects: &ObjectTable) -> Result<Vec<ObjectId>> {
    match page.get(b"Contents") {
        Err(_) => Ok(Vec::new()),
        Ok(Object::Reference(id)) => match objects.get(*id)? {
            Object::Array(items) => references(items),
            _ => Ok(vec![*id]),
        },
        Ok(Object::Array(items)) => references(items),
        Ok(other) => Err(other.type_error("Reference")),
    }
}

fn fonts(resources: &Dictionary, objects: &ObjectTable) -> Result<BTreeMap<String, Font>> {
    let mut fonts = BTreeMap::new();
    let Ok(font_dict) = resources.get(b"Font") else {
        return Ok(fonts);
    };
    for (name, font) in objects.dereference(font_dict)?.as_dict()? {
        let name = String::from_utf8_lossy(name).into_owned();
        match objects.dereference(font)? {
            Object::Dictionary(dict) => {
                let font = Font::new(name.clone(), dict.clone(), objects)?;
                fonts.insert(name, font);
            }
            other => warn!("font resource /{name} is a {}, skipping", other.enum_variant()),
        }
    }
    Ok(fonts)
}

fn build_page(number: u32, id: ObjectId, node: &Dictionary, inherited: Inherited, objects: &ObjectTable) -> Result<Page> {
    let contents = content_ids(node, objects)?;
    let content_streams = contents
        .iter()
        .map(|&id| objects.get(id).and_then(Object::as_stream).cloned())
        .collect::<Result<Vec<_>>>()?;
    let resources = inherited.resources.unwrap_or_default();
    let fonts = fonts(&resources, objects)?;

    Ok(Page {
        number,
        id,
        contents,
        resources,
        fonts,
        media_box: inherited.media_box,
        crop_box: inherited.crop_box,
        rotate: inherited.rotate,
        content_streams,
        texts: OnceCell::new(),
    })
}

/// Walks the page tree below `root` depth first, numbering leaves from 1.
pub(crate) fn collect_pages(root: ObjectId, objects: &ObjectTable) -> Result<Vec<Page>> {
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root, Inherited::default())];

    while let Some((id, parent)) = stack.pop() {
        if !visited.insert(id) {
            warn!("page tree visits {} {} R twice, skipping", id.0, id.1);
            continue;
        }
        let node = objects.get(id)?.as_dict()?;
        let inherited = parent.overlay(node, objects)?;

        let is_leaf = node.has_type(b"Page") || (!node.has_type(b"Pages") && !node.has(b"Kids"));
        if is_leaf {
            let number = pages.len() as u32 + 1;
            pages.push(build_page(number, id, node, inherited, objects)?);
            continue;
        }

        let kids = match node.get(b"Kids") {
            Ok(kids) => objects.dereference(kids)?.as_array()?,
            Err(_) => {
                warn!("page tree node {} {} R has no /Kids", id.0, id.1);
                continue;
            }
        };
        for kid in kids.iter().rev() {
            match kid {
                Object::Reference(kid) => stack.push((*kid, inherited.clone())),
                other => warn!("/Kids entry is a {}, skipping", other.enum_variant()),
            }
        }
    }
    Ok(pages)
}

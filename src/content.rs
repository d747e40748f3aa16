use std::collections::BTreeMap;
use std::fmt;

use log::{trace, warn};

use crate::font::Font;
use crate::{Object, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operator: String,
    pub operands: Vec<Object>,
}

impl Operation {
    pub fn new(operator: &str, operands: Vec<Object>) -> Operation {
        Operation {
            operator: operator.to_string(),
            operands,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Content {
    pub operations: Vec<Operation>,
}

impl Content {
    /// Decode content operations.
    pub fn decode(data: &[u8]) -> Result<Self> {
        crate::parser::content(data)
    }
}

/// One `BT … ET` block's text with the state it was shown in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DocumentText {
    pub value: String,
    pub font_size: f32,
    /// Resource name of the font, e.g. `F1`.
    pub font_family: String,
    /// Translation part `(e, f)` of the text matrix.
    pub position: (f32, f32),
}

impl fmt::Display for DocumentText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "text(font: {}, size: {}): {}", self.font_family, self.font_size, self.value)
    }
}

#[derive(Debug, Default)]
struct TextState<'a> {
    font: Option<&'a Font>,
    font_name: String,
    font_size: f32,
    matrix: [f32; 6],
    value: String,
}

impl TextState<'_> {
    fn finish(self) -> DocumentText {
        DocumentText {
            value: self.value,
            font_size: self.font_size,
            font_family: self.font_name,
            position: (self.matrix[4], self.matrix[5]),
        }
    }
}

fn number(object: &Object) -> Option<f32> {
    object.as_float().ok()
}

/// Replays text operators and collects one [`DocumentText`] per text object.
pub(crate) fn replay(content: &Content, fonts: &BTreeMap<String, Font>) -> Result<Vec<DocumentText>> {
    let mut texts = Vec::new();
    let mut state: Option<TextState> = None;

    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "BT" => {
                if state.is_some() {
                    warn!("nested BT, previous text object is dropped");
                }
                state = Some(TextState {
                    matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                    ..TextState::default()
                });
            }
            "ET" => match state.take() {
                Some(text) => texts.push(text.finish()),
                None => warn!("ET without BT"),
            },
            operator => {
                let Some(text) = state.as_mut() else {
                    continue;
                };
                match operator {
                    "Tf" => {
                        let (Some(Object::Name(name)), Some(size)) = (operands.first(), operands.get(1).and_then(number))
                        else {
                            warn!("Tf with malformed operands {operands:?}");
                            continue;
                        };
                        let name = String::from_utf8_lossy(name).into_owned();
                        text.font = fonts.get(&name);
                        if text.font.is_none() {
                            warn!("font /{name} is not in the page resources");
                        }
                        text.font_name = name;
                        text.font_size = size;
                    }
                    "Tm" => {
                        let values: Vec<f32> = operands.iter().filter_map(number).collect();
                        match <[f32; 6]>::try_from(values) {
                            Ok(matrix) => text.matrix = matrix,
                            Err(_) => warn!("Tm expects 6 numbers, got {operands:?}"),
                        }
                    }
                    // Positioning within the text object does not move the reported position.
                    "Td" | "TD" => {}
                    "Tj" | "'" => show(text, operands.first())?,
                    "\"" => show(text, operands.get(2))?,
                    "TJ" => {
                        if let Some(Object::Array(items)) = operands.first() {
                            for item in items {
                                if matches!(item, Object::String(..)) {
                                    show(text, Some(item))?;
                                }
                            }
                        }
                    }
                    _ => trace!("ignoring operator {operator}"),
                }
            }
        }
    }
    if state.is_some() {
        warn!("content ends inside a text object");
    }
    Ok(texts)
}

fn show(text: &mut TextState, operand: Option<&Object>) -> Result<()> {
    let Some(Object::String(bytes, _)) = operand else {
        return Ok(());
    };
    let decoded = match text.font {
        Some(font) => font.decode(bytes)?,
        None => bytes.iter().map(|&byte| char::from(byte)).collect(),
    };
    text.value.push_str(&decoded);
    Ok(())
}

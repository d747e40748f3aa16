use pdfgraph::{Object, PdfDocument, dictionary};

mod utils;
use utils::*;

#[test]
fn dictionary_entries_change_in_place() {
    let mut doc = PdfDocument::load_mem(&text_document(&[PAGE_ONE])).unwrap();

    let font = doc.object_table.get_mut((3, 0)).unwrap().as_dict_mut().unwrap();
    font.set("BaseFont", "Courier");
    assert_eq!(
        doc.get_object((3, 0)).unwrap().as_dict().unwrap().get(b"BaseFont").unwrap(),
        &Object::Name(b"Courier".to_vec())
    );
}

#[test]
fn new_objects_get_fresh_ids() {
    let mut doc = PdfDocument::load_mem(&text_document(&[PAGE_ONE, PAGE_TWO])).unwrap();
    assert_eq!(doc.object_table.max_id(), 7);

    let id = doc.object_table.new_object_id();
    assert_eq!(id, (8, 0));
    let field = dictionary! { "FT" => "Tx", "V" => Object::string_literal("Field 1 Value") };
    assert!(doc.object_table.insert(id, field.into()).is_none());

    let value = doc.get_object(id).unwrap().as_dict().unwrap().get(b"V").unwrap();
    assert_eq!(value.as_str().unwrap(), b"Field 1 Value");
    assert!(doc.object_table.contains(id));
}

#[test]
fn insert_replaces_and_returns_the_previous_object() {
    let mut doc = PdfDocument::load_mem(&text_document(&[PAGE_ONE])).unwrap();
    let previous = doc.object_table.insert((1, 0), Object::Null).unwrap();
    assert!(previous.as_dict().unwrap().has_type(b"Catalog"));
    assert_eq!(doc.get_object((1, 0)).unwrap(), &Object::Null);
}

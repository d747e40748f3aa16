use pdfgraph::{PdfDocument, XrefEntry};

mod utils;
use utils::*;

const UPDATED: &str = "this text replaced the first revision";

#[test]
fn newest_revision_shadows_older_objects() {
    init_logger();
    let mut builder = text_document_builder(&[PAGE_ONE]);
    let first_xref = builder.last_xref().unwrap();
    let Some(Entry::Normal(old_offset)) = builder.entry(5) else {
        panic!("content stream missing");
    };

    builder
        .stream(5, "", page_content(UPDATED).as_bytes())
        .xref_table("/Root 1 0 R");
    let Some(Entry::Normal(new_offset)) = builder.entry(5) else {
        panic!("content stream missing");
    };
    assert!(new_offset > old_offset);

    let doc = PdfDocument::load_mem(&builder.bytes()).unwrap();
    assert_eq!(doc.trailer.prev(), Some(first_xref as i64));
    assert!(matches!(
        doc.object_table.xref().get(5),
        Some(&XrefEntry::Normal { offset, .. }) if offset as usize == new_offset
    ));
    assert_eq!(doc.object_table.span((5, 0)).unwrap().offset, new_offset);
    assert_eq!(doc.pages[0].extract_text().unwrap(), UPDATED);

    // Objects only the first revision lists are still found.
    assert!(doc.get_object((3, 0)).unwrap().as_dict().unwrap().has_type(b"Font"));
}

#[test]
fn three_revisions_resolve_to_the_latest() {
    let mut builder = text_document_builder(&[PAGE_ONE]);
    builder.stream(5, "", page_content("second").as_bytes()).xref_table("/Root 1 0 R");
    builder.stream(5, "", page_content("third").as_bytes()).xref_table("/Root 1 0 R");

    let doc = PdfDocument::load_mem(&builder.bytes()).unwrap();
    assert_eq!(doc.pages[0].extract_text().unwrap(), "third");
}

#[test]
fn update_can_add_pages() {
    let mut builder = text_document_builder(&[PAGE_ONE]);
    builder
        .object(2, "<</Type /Pages /Kids [4 0 R 6 0 R] /Count 2>>")
        .object(
            6,
            "<</Type /Page /Parent 2 0 R /Resources <</Font <</F1 3 0 R>>>> /Contents 7 0 R>>",
        )
        .stream(7, "", page_content(PAGE_TWO).as_bytes())
        .xref_table("/Root 1 0 R");

    let doc = PdfDocument::load_mem(&builder.bytes()).unwrap();
    assert_eq!(doc.trailer.size().unwrap(), 8);
    let texts: Vec<String> = doc.pages.iter().map(|page| page.extract_text().unwrap()).collect();
    assert_eq!(texts, vec![PAGE_ONE, PAGE_TWO]);
}

#[test]
fn xref_stream_updates_shadow_packed_objects() {
    let mut builder = compressed_document(&[PAGE_ONE]);
    let first_xref = builder.last_xref().unwrap();
    let page = "<</Type /Page /Parent 2 0 R /Resources <</Font <</F1 3 0 R>>>> /Contents 9 0 R>>";
    builder
        .object_stream(102, &[(4, page.to_string())])
        .flate_stream(9, "", page_content(UPDATED).as_bytes())
        .xref_stream_update(103, "/Root 1 0 R");

    let doc = PdfDocument::load_mem(&builder.bytes()).unwrap();
    assert_eq!(doc.trailer.prev(), Some(first_xref as i64));
    assert!(matches!(
        doc.object_table.xref().get(4),
        Some(&XrefEntry::Compressed { container: 102, index: 0 })
    ));
    assert!(matches!(
        doc.object_table.xref().get(1),
        Some(&XrefEntry::Compressed { container: 100, .. })
    ));
    assert_eq!(doc.pages[0].extract_text().unwrap(), UPDATED);

    // The first revision's content stream is still listed, just no longer used.
    assert!(doc.get_object((5, 0)).unwrap().as_stream().is_ok());
}

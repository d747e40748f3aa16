#![cfg(feature = "serde")]

use pdfgraph::PdfDocument;

mod utils;
use utils::*;

#[test]
fn texts_serialize_to_json() {
    let doc = PdfDocument::load_mem(&text_document(&[PAGE_ONE])).unwrap();
    let page = doc.page(1).unwrap();

    let texts = serde_json::to_value(page.get_texts().unwrap()).unwrap();
    assert_eq!(
        texts,
        serde_json::json!([{
            "value": PAGE_ONE,
            "font_size": 24.0,
            "font_family": "F1",
            "position": [72.0, 712.0],
        }])
    );

    let media_box = serde_json::to_value(page.media_box.unwrap()).unwrap();
    assert_eq!(media_box["right"], 612.0);
    assert_eq!(media_box["top"], 792.0);
}

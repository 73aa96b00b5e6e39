use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::tempdir;
use underwrite_core::{load_document, AssessError, ChunkConfig, Chunker, SourceKind};

fn write_pdf(path: &Path, pages: &[Option<&str>]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::new();
    for page in pages {
        let operations = match page {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            // A filled rectangle stands in for a scanned image: graphics, no text.
            None => vec![
                Operation::new("re", vec![72.into(), 72.into(), 400.into(), 600.into()]),
                Operation::new("f", vec![]),
            ],
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::from(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[test]
fn pdf_yields_one_record_per_page_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("appraisal.pdf");
    write_pdf(
        &path,
        &[Some("Roof: good condition."), Some("Foundation: minor cracks.")],
    );

    let docs = load_document(&path, SourceKind::Pdf).unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs[0].text.contains("Roof"));
    assert!(docs[1].text.contains("Foundation"));
    assert_eq!(docs[0].metadata.page_index, Some(0));
    assert_eq!(docs[1].metadata.page_index, Some(1));
    assert_eq!(docs[1].metadata.origin_file, "appraisal.pdf");
}

#[test]
fn image_only_pdf_loads_without_text() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.pdf");
    write_pdf(&path, &[None, None]);

    let docs = load_document(&path, SourceKind::Pdf).unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.is_blank()));
    let chunks = Chunker::new(ChunkConfig::default())
        .unwrap()
        .split_documents(&docs);
    assert!(chunks.is_empty());
}

#[test]
fn truncated_pdf_is_unreadable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.pdf");
    write_pdf(&path, &[Some("Roof: good condition.")]);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 3]).unwrap();

    let err = load_document(&path, SourceKind::Pdf).unwrap_err();
    assert!(matches!(err, AssessError::UnreadableDocument { .. }));
}

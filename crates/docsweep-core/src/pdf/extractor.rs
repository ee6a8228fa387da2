use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tokio_util::sync::CancellationToken;

use super::outline::{build_outline, detect_title, Bookmark};
use super::PdfBackend;
use crate::error::ParseError;
use crate::types::{AssetKind, AssetRef, ExtractedContent, PageRecord};

/// US Letter, used when a page has no usable MediaBox.
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Guard against reference cycles in malformed page trees and outlines.
const MAX_TREE_DEPTH: usize = 64;
const MAX_BOOKMARKS: usize = 10_000;

/// [`PdfBackend`] built on lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

impl PdfBackend for LopdfBackend {
    type Handle = Document;

    fn open(&self, path: &Path) -> Result<Document, ParseError> {
        let pdf_bytes = std::fs::read(path)?;
        let doc = Document::load_mem(&pdf_bytes)?;
        if doc.is_encrypted() {
            return Err(ParseError::Unsupported("document is encrypted".to_string()));
        }
        Ok(doc)
    }

    fn extract(
        &self,
        doc: Document,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ParseError> {
        let pages: BTreeMap<u32, ObjectId> = doc.get_pages();
        if pages.is_empty() {
            return Err(ParseError::Corrupt("document has no pages".to_string()));
        }

        let mut records = Vec::with_capacity(pages.len());
        let mut failed_pages = 0;

        for (&page_num, &page_id) in &pages {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled);
            }

            let text = match doc.extract_text(&[page_num]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(page = page_num, error = %e, "Page text extraction failed");
                    failed_pages += 1;
                    String::new()
                }
            };
            let (width, height) = media_box(&doc, page_id).unwrap_or(DEFAULT_PAGE_SIZE);

            records.push(PageRecord {
                number: page_num,
                width,
                height,
                text,
                assets: page_assets(&doc, page_id),
            });
        }

        if failed_pages == records.len() {
            return Err(ParseError::Unsupported(
                "text could not be decoded on any page".to_string(),
            ));
        }

        let bookmarks = bookmarks(&doc, &pages);
        let outline = build_outline(&bookmarks, &records);
        let metadata_title = info_title(&doc);
        let title = detect_title(metadata_title.as_deref(), &records, &outline);

        tracing::debug!(
            pages = records.len(),
            bookmarks = bookmarks.len(),
            headings = outline.len(),
            "Extracted document"
        );

        Ok(ExtractedContent {
            title,
            outline,
            pages: records,
        })
    }
}

/// Follow indirect references to the underlying object.
fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_TREE_DEPTH {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Look up a page attribute, walking up `/Parent` for inherited values.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        dict = resolve_dict(doc, dict.get(b"Parent").ok()?)?;
    }
    None
}

fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f64, f64)> {
    let Object::Array(values) = inherited(doc, page_id, b"MediaBox")? else {
        return None;
    };
    let coords: Vec<f64> = values
        .iter()
        .filter_map(|v| resolve(doc, v).and_then(as_number))
        .collect();
    match coords.as_slice() {
        [x1, y1, x2, y2] => Some(((x2 - x1).abs(), (y2 - y1).abs())),
        _ => None,
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key).ok()? {
        Object::Integer(i) => u32::try_from(*i).ok(),
        _ => None,
    }
}

/// XObjects and fonts listed in the page's (possibly inherited) resources.
fn page_assets(doc: &Document, page_id: ObjectId) -> Vec<AssetRef> {
    let Some(resources) = inherited(doc, page_id, b"Resources").and_then(|o| resolve_dict(doc, o))
    else {
        return Vec::new();
    };

    let mut assets = Vec::new();

    if let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
    {
        for (name, obj) in xobjects.iter() {
            let Some(dict) = resolve_dict(doc, obj) else {
                continue;
            };
            let kind = match dict.get(b"Subtype").and_then(|s| s.as_name()) {
                Ok(b"Image") => AssetKind::Image,
                Ok(b"Form") => AssetKind::Form,
                _ => AssetKind::Other,
            };
            assets.push(AssetRef {
                name: String::from_utf8_lossy(name).into_owned(),
                kind,
                width: dimension(dict, b"Width"),
                height: dimension(dict, b"Height"),
            });
        }
    }

    if let Some(fonts) = resources
        .get(b"Font")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
    {
        for (name, _) in fonts.iter() {
            assets.push(AssetRef {
                name: String::from_utf8_lossy(name).into_owned(),
                kind: AssetKind::Font,
                width: None,
                height: None,
            });
        }
    }

    assets.sort_by(|a, b| (a.kind as u8, &a.name).cmp(&(b.kind as u8, &b.name)));
    assets
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise UTF-8 or Latin-1).
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn text_value(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match resolve(doc, dict.get(key).ok()?)? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

fn info_title(doc: &Document) -> Option<String> {
    let info = resolve_dict(doc, doc.trailer.get(b"Info").ok()?)?;
    text_value(doc, info, b"Title").filter(|t| !t.trim().is_empty())
}

/// Read the `/Outlines` bookmark tree in document order.
fn bookmarks(doc: &Document, pages: &BTreeMap<u32, ObjectId>) -> Vec<Bookmark> {
    let page_numbers: BTreeMap<ObjectId, u32> = pages.iter().map(|(&n, &id)| (id, n)).collect();

    let first = doc
        .trailer
        .get(b"Root")
        .ok()
        .and_then(|root| resolve_dict(doc, root))
        .and_then(|catalog| catalog.get(b"Outlines").ok())
        .and_then(|o| resolve_dict(doc, o))
        .and_then(|outlines| outlines.get(b"First").ok());

    let mut out = Vec::new();
    let mut visited = HashSet::new();
    if let Some(first) = first {
        walk_bookmarks(doc, first, 1, &page_numbers, &mut visited, &mut out);
    }
    out
}

fn walk_bookmarks(
    doc: &Document,
    first: &Object,
    depth: usize,
    page_numbers: &BTreeMap<ObjectId, u32>,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<Bookmark>,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }

    let mut current = first.as_reference().ok();
    while let Some(id) = current {
        if !visited.insert(id) || out.len() >= MAX_BOOKMARKS {
            return;
        }
        let Ok(item) = doc.get_dictionary(id) else {
            return;
        };

        if let Some(title) = text_value(doc, item, b"Title") {
            out.push(Bookmark {
                depth,
                title,
                page: bookmark_page(doc, item, page_numbers).unwrap_or(1),
            });
        }
        if let Ok(child) = item.get(b"First") {
            walk_bookmarks(doc, child, depth + 1, page_numbers, visited, out);
        }
        current = item.get(b"Next").and_then(|n| n.as_reference()).ok();
    }
}

/// Page a bookmark points at, from `/Dest` or a GoTo action's `/D`.
fn bookmark_page(
    doc: &Document,
    item: &Dictionary,
    page_numbers: &BTreeMap<ObjectId, u32>,
) -> Option<u32> {
    let dest = match item.get(b"Dest") {
        Ok(dest) => resolve(doc, dest)?,
        Err(_) => {
            let action = resolve_dict(doc, item.get(b"A").ok()?)?;
            resolve(doc, action.get(b"D").ok()?)?
        }
    };
    let Object::Array(parts) = dest else {
        return None;
    };
    let page_id = parts.first()?.as_reference().ok()?;
    page_numbers.get(&page_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn escape(text: &str) -> String {
        text.replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)")
    }

    /// Build a PDF with one page per entry, optional Info title and bookmarks
    /// (one top-level bookmark per page).
    fn build_pdf(page_texts: &[&str], title: Option<&str>, with_bookmarks: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0u8; 8],
        ));
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im0" => image_id },
        });

        let mut page_ids = Vec::new();
        for text in page_texts {
            let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", escape(text));
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        // MediaBox is inherited from the page tree root.
        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        for page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };

        if with_bookmarks {
            let outlines_id = doc.new_object_id();
            let item_ids: Vec<ObjectId> = page_ids.iter().map(|_| doc.new_object_id()).collect();
            for (i, (&item_id, &page_id)) in item_ids.iter().zip(&page_ids).enumerate() {
                let mut item = dictionary! {
                    "Title" => Object::string_literal(format!("Chapter {}", i + 1)),
                    "Parent" => outlines_id,
                    "Dest" => vec![page_id.into(), "Fit".into()],
                };
                if let Some(&next) = item_ids.get(i + 1) {
                    item.set("Next", next);
                }
                doc.objects.insert(item_id, Object::Dictionary(item));
            }
            doc.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Outlines",
                    "First" => item_ids[0],
                    "Last" => item_ids[item_ids.len() - 1],
                    "Count" => Object::Integer(item_ids.len() as i64),
                }),
            );
            catalog.set("Outlines", outlines_id);
        }

        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);

        if let Some(title) = title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::string_literal(title),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn extract_file(bytes: &[u8]) -> Result<ExtractedContent, ParseError> {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.pdf");
        std::fs::write(&path, bytes).unwrap();

        let backend = LopdfBackend;
        let handle = backend.open(&path)?;
        backend.extract(handle, &CancellationToken::new())
    }

    #[test]
    fn test_extract_pages_dimensions_and_assets() {
        let content = extract_file(&build_pdf(&["Page One", "Page Two"], None, false)).unwrap();

        assert_eq!(content.page_count(), 2);
        assert_eq!(content.pages[0].number, 1);
        assert_eq!(content.pages[1].number, 2);
        assert_eq!(content.pages[0].width, 595.0);
        assert_eq!(content.pages[0].height, 842.0);
        assert!(
            content.pages[0].text.contains("Page") || content.pages[0].text.contains("One"),
            "unexpected page text: '{}'",
            content.pages[0].text
        );

        let assets = &content.pages[1].assets;
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].kind, AssetKind::Image);
        assert_eq!(assets[0].name, "Im0");
        assert_eq!(assets[0].width, Some(4));
        assert_eq!(assets[0].height, Some(2));
        assert_eq!(assets[1].kind, AssetKind::Font);
        assert_eq!(assets[1].name, "F1");
    }

    #[test]
    fn test_extract_reads_bookmarks() {
        let content =
            extract_file(&build_pdf(&["Alpha", "Beta", "Gamma"], None, true)).unwrap();

        let texts: Vec<_> = content.outline.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Chapter 1", "Chapter 2", "Chapter 3"]);
        let pages: Vec<_> = content.outline.iter().map(|e| e.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(content.title.as_deref(), Some("Chapter 1"));
    }

    #[test]
    fn test_extract_uses_metadata_title_found_in_text() {
        let content = extract_file(&build_pdf(&["Quarterly Review"], Some("Quarterly Review"), false))
            .unwrap();
        assert_eq!(content.title.as_deref(), Some("Quarterly Review"));
    }

    #[test]
    fn test_open_file_not_found() {
        let err = LopdfBackend
            .open(Path::new("/nonexistent/path/to/file.pdf"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Io(_)), "got: {err}");
    }

    #[test]
    fn test_open_invalid_pdf() {
        let err = extract_file(b"this is not a valid pdf file").unwrap_err();
        assert!(matches!(err, ParseError::Corrupt(_)), "got: {err}");
    }

    #[test]
    fn test_open_empty_file() {
        let err = extract_file(b"").unwrap_err();
        assert!(matches!(err, ParseError::Corrupt(_)), "got: {err}");
    }

    #[test]
    fn test_extract_stops_when_cancelled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.pdf");
        std::fs::write(&path, build_pdf(&["One"], None, false)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = LopdfBackend.open(&path).unwrap();
        let err = LopdfBackend.extract(handle, &cancel).unwrap_err();
        assert!(matches!(err, ParseError::Cancelled));
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(
            decode_text_string(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]),
            "Hi"
        );
        assert_eq!(decode_text_string(&[0x43, 0x61, 0x66, 0xE9]), "Café");
    }
}

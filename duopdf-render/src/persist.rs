//! Native Text and Highlight annotations read and written with `lopdf`.

use std::collections::HashSet;

use duopdf_core::annotations::native::{
    AnnotationPersistence, NativeAnnotation, NativeKind, NativePage, PageAnnotations, PdfRect,
};
use duopdf_core::PersistError;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use tracing::{debug, instrument};

/// Edge of the popup window attached to a written annotation, in points.
const POPUP_SIZE: f64 = 180.0;

pub struct LopdfPersistence;

impl AnnotationPersistence for LopdfPersistence {
    #[instrument(skip_all, fields(len = bytes.len()))]
    fn read(&self, bytes: &[u8]) -> Result<Vec<NativePage>, PersistError> {
        let doc = load(bytes)?;
        let mut pages = Vec::new();
        for page_id in doc.get_pages().into_values() {
            let media = media_box(&doc, page_id)?;
            let mut annotations = Vec::new();
            for (index, entry) in page_annotations(&doc, page_id).iter().enumerate() {
                let Some(dict) = resolve(&doc, entry).and_then(|o| o.as_dict().ok()) else {
                    continue;
                };
                if let Some(mut native) = read_annotation(&doc, dict, &media) {
                    native.name = Some(annotation_key(&doc, entry, index, dict));
                    annotations.push(native);
                }
            }
            pages.push(NativePage {
                width: media.x2 - media.x1,
                height: media.y2 - media.y1,
                annotations,
            });
        }
        Ok(pages)
    }

    #[instrument(skip_all, fields(len = bytes.len(), pages = pages.len()))]
    fn write(&self, bytes: &[u8], pages: &[PageAnnotations]) -> Result<Vec<u8>, PersistError> {
        let mut doc = load(bytes)?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        for page in pages {
            let page_id = *page_ids
                .get(page.page_index)
                .ok_or(PersistError::PageOutOfRange(page.page_index))?;
            let media = media_box(&doc, page_id)?;

            let existing = page_annotations(&doc, page_id);
            let dropped = owned_entries(&doc, &existing, &page.replaces);
            let mut kept: Vec<Object> = existing
                .into_iter()
                .enumerate()
                .filter(|(index, _)| !dropped.contains(index))
                .map(|(_, entry)| entry)
                .collect();
            debug!(
                page = page.page_index,
                dropped = dropped.len(),
                kept = kept.len(),
                "rewriting page annotations"
            );

            for native in &page.annotations {
                let (annotation_id, popup_id) = add_annotation(&mut doc, page_id, native, &media)?;
                kept.push(Object::Reference(annotation_id));
                kept.push(Object::Reference(popup_id));
            }

            doc.get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|err| PersistError::Malformed(format!("page dictionary: {err}")))?
                .set("Annots", Object::Array(kept));
        }

        doc.prune_objects();
        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|err| PersistError::Write(err.to_string()))?;
        Ok(output)
    }
}

fn load(bytes: &[u8]) -> Result<Document, PersistError> {
    Document::load_mem(bytes).map_err(|err| PersistError::Malformed(err.to_string()))
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

fn rect_from(doc: &Document, object: &Object) -> Option<PdfRect> {
    let values = resolve(doc, object)?.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let n: Vec<f64> = values
        .iter()
        .filter_map(|v| resolve(doc, v).and_then(number))
        .collect();
    (n.len() == 4).then(|| PdfRect::new(n[0], n[1], n[2], n[3]))
}

/// Page key looked up on the page, then on its ancestors.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    let mut seen = HashSet::new();
    while seen.insert(current) {
        let dict = doc.get_object(current).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> Result<PdfRect, PersistError> {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|object| rect_from(doc, object))
        .ok_or_else(|| PersistError::Malformed(format!("page {page_id:?} has no MediaBox")))
}

/// Entries of the page's /Annots array, which may itself be a reference.
fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    doc.get_object(page_id)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|dict| dict.get(b"Annots").ok())
        .and_then(|annots| resolve(doc, annots))
        .and_then(|annots| annots.as_array().ok())
        .cloned()
        .unwrap_or_default()
}

fn subtype(dict: &Dictionary) -> Option<&[u8]> {
    dict.get(b"Subtype")
        .and_then(Object::as_name)
        .ok()
}

fn native_kind(dict: &Dictionary) -> Option<NativeKind> {
    match subtype(dict)? {
        b"Text" => Some(NativeKind::Text),
        b"Highlight" => Some(NativeKind::Highlight),
        _ => None,
    }
}

/// Identity of an annotation entry: its /NM, else the object reference, else
/// its position in an /Annots array of inline dictionaries.
fn annotation_key(doc: &Document, entry: &Object, index: usize, dict: &Dictionary) -> String {
    let named = dict
        .get(b"NM")
        .ok()
        .and_then(|value| resolve(doc, value))
        .and_then(|value| match value {
            Object::String(bytes, _) => Some(decode_text(bytes)),
            _ => None,
        })
        .filter(|name| !name.is_empty());
    match (named, entry) {
        (Some(name), _) => name,
        (None, Object::Reference((number, generation))) => format!("{number} {generation} R"),
        (None, _) => format!("#{index}"),
    }
}

/// Indices of the entries to drop: Text and Highlight annotations whose key
/// is listed in `replaces`, and the popups belonging to them.
fn owned_entries(doc: &Document, entries: &[Object], replaces: &[String]) -> HashSet<usize> {
    let mut dropped = HashSet::new();
    let mut owners = HashSet::new();
    let mut popups = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(dict) = resolve(doc, entry).and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        if native_kind(dict).is_none()
            || !replaces.contains(&annotation_key(doc, entry, index, dict))
        {
            continue;
        }
        dropped.insert(index);
        if let Object::Reference(id) = entry {
            owners.insert(*id);
        }
        if let Ok(popup) = dict.get(b"Popup").and_then(Object::as_reference) {
            popups.insert(popup);
        }
    }
    for (index, entry) in entries.iter().enumerate() {
        if let Object::Reference(id) = entry {
            if popups.contains(id) {
                dropped.insert(index);
                continue;
            }
        }
        let Some(dict) = resolve(doc, entry).and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        let orphaned = subtype(dict) == Some(b"Popup".as_slice())
            && dict
                .get(b"Parent")
                .and_then(Object::as_reference)
                .is_ok_and(|parent| owners.contains(&parent));
        if orphaned {
            dropped.insert(index);
        }
    }
    dropped
}

fn read_annotation(doc: &Document, dict: &Dictionary, media: &PdfRect) -> Option<NativeAnnotation> {
    let kind = native_kind(dict)?;
    let rect = rect_from(doc, dict.get(b"Rect").ok()?)?;
    let quad_points = dict
        .get(b"QuadPoints")
        .ok()
        .and_then(|q| resolve(doc, q))
        .and_then(|q| q.as_array().ok())
        .map(|values| {
            values
                .iter()
                .filter_map(number)
                .enumerate()
                .map(|(i, v)| if i % 2 == 0 { v - media.x1 } else { v - media.y1 })
                .collect()
        })
        .unwrap_or_default();
    let text = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|value| resolve(doc, value))
            .and_then(|value| match value {
                Object::String(bytes, _) => Some(decode_text(bytes)),
                _ => None,
            })
    };
    Some(NativeAnnotation {
        kind,
        rect: PdfRect::new(
            rect.x1 - media.x1,
            rect.y1 - media.y1,
            rect.x2 - media.x1,
            rect.y2 - media.y1,
        ),
        quad_points,
        contents: text(b"Contents").unwrap_or_default(),
        author: text(b"T"),
        modified: text(b"M"),
        name: None,
    })
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn rect_object(rect: &PdfRect) -> Object {
    Object::Array(vec![
        real(rect.x1),
        real(rect.y1),
        real(rect.x2),
        real(rect.y2),
    ])
}

/// Writes one annotation and its popup, anchored at the annotation's
/// top-right corner. Coordinates in `native` are relative to the MediaBox
/// origin.
fn add_annotation(
    doc: &mut Document,
    page_id: ObjectId,
    native: &NativeAnnotation,
    media: &PdfRect,
) -> Result<(ObjectId, ObjectId), PersistError> {
    let rect = PdfRect::new(
        native.rect.x1 + media.x1,
        native.rect.y1 + media.y1,
        native.rect.x2 + media.x1,
        native.rect.y2 + media.y1,
    );

    let mut annotation = Dictionary::new();
    annotation.set("Type", Object::Name(b"Annot".to_vec()));
    annotation.set("Rect", rect_object(&rect));
    annotation.set("P", Object::Reference(page_id));
    annotation.set("F", Object::Integer(4));
    annotation.set("Contents", encode_text(&native.contents));
    if let Some(author) = &native.author {
        annotation.set("T", encode_text(author));
    }
    if let Some(name) = &native.name {
        annotation.set("NM", encode_text(name));
    }
    if let Some(modified) = &native.modified {
        annotation.set("M", encode_text(modified));
        annotation.set("CreationDate", encode_text(modified));
    }

    match native.kind {
        NativeKind::Text => {
            annotation.set("Subtype", Object::Name(b"Text".to_vec()));
            annotation.set("Name", Object::Name(b"Comment".to_vec()));
            annotation.set("Open", Object::Boolean(false));
            annotation.set(
                "C",
                Object::Array(vec![real(1.0), real(0.85), real(0.2)]),
            );
        }
        NativeKind::Highlight => {
            annotation.set("Subtype", Object::Name(b"Highlight".to_vec()));
            let quads = native
                .quad_points
                .iter()
                .enumerate()
                .map(|(i, v)| real(if i % 2 == 0 { v + media.x1 } else { v + media.y1 }))
                .collect();
            annotation.set("QuadPoints", Object::Array(quads));
            annotation.set("C", Object::Array(vec![real(1.0), real(1.0), real(0.0)]));
            annotation.set("CA", real(0.4));
        }
    }

    let annotation_id = doc.add_object(Object::Dictionary(annotation));

    let popup_rect = PdfRect::new(
        rect.x2,
        (rect.y2 - POPUP_SIZE).max(media.y1),
        (rect.x2 + POPUP_SIZE).min(media.x2),
        rect.y2,
    );
    let mut popup = Dictionary::new();
    popup.set("Type", Object::Name(b"Annot".to_vec()));
    popup.set("Subtype", Object::Name(b"Popup".to_vec()));
    popup.set("Rect", rect_object(&popup_rect));
    popup.set("Parent", Object::Reference(annotation_id));
    popup.set("Open", Object::Boolean(false));
    let popup_id = doc.add_object(Object::Dictionary(popup));

    doc.get_object_mut(annotation_id)
        .and_then(Object::as_dict_mut)
        .map_err(|err| PersistError::Write(err.to_string()))?
        .set("Popup", Object::Reference(popup_id));
    Ok((annotation_id, popup_id))
}

/// PDF text strings are PDFDocEncoding or UTF-16BE with a byte-order mark.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        },
    }
}

fn encode_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use duopdf_core::geometry::PercentRect;
    use duopdf_core::{AnnotationStore, Side};
    use lopdf::dictionary;

    /// Pages inherit the MediaBox from the page tree node.
    pub(crate) fn sample_pdf(pages: usize, media_box: [i64; 4]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                Object::Reference(doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => Object::Reference(pages_id),
                }))
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => media_box.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn comment(x: f64, top: f64, text: &str) -> NativeAnnotation {
        NativeAnnotation {
            kind: NativeKind::Text,
            rect: PdfRect::new(x, top - 24.0, x + 24.0, top),
            quad_points: Vec::new(),
            contents: text.to_string(),
            author: Some("Ada".into()),
            modified: Some("D:20240506070809+00'00'".into()),
            name: Some(text.to_string()),
        }
    }

    fn highlight() -> NativeAnnotation {
        NativeAnnotation {
            kind: NativeKind::Highlight,
            rect: PdfRect::new(72.0, 688.0, 272.0, 700.0),
            quad_points: vec![72.0, 700.0, 272.0, 700.0, 72.0, 688.0, 272.0, 688.0],
            contents: "important".into(),
            author: Some("Ada".into()),
            modified: None,
            name: None,
        }
    }

    fn annots_len(bytes: &[u8], page_index: usize) -> usize {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = doc.get_pages().into_values().nth(page_index).unwrap();
        page_annotations(&doc, page_id).len()
    }

    #[test]
    fn written_annotations_read_back() {
        let pdf = sample_pdf(2, [0, 0, 612, 792]);
        let written = LopdfPersistence
            .write(
                &pdf,
                &[PageAnnotations {
                    page_index: 1,
                    annotations: vec![comment(306.0, 396.0, "Review this"), highlight()],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();

        let pages = LopdfPersistence.read(&written).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].annotations.is_empty());
        assert_eq!(pages[1].width, 612.0);
        assert_eq!(pages[1].height, 792.0);
        let natives = &pages[1].annotations;
        assert_eq!(natives.len(), 2);

        let text = natives.iter().find(|a| a.kind == NativeKind::Text).unwrap();
        assert_eq!(text.contents, "Review this");
        assert_eq!(text.author.as_deref(), Some("Ada"));
        assert_eq!(text.modified.as_deref(), Some("D:20240506070809+00'00'"));
        assert_eq!(text.rect, PdfRect::new(306.0, 372.0, 330.0, 396.0));
        assert_eq!(text.name.as_deref(), Some("Review this"));

        let marked = natives
            .iter()
            .find(|a| a.kind == NativeKind::Highlight)
            .unwrap();
        assert_eq!(marked.quad_points, highlight().quad_points);
        // Without /NM the object reference identifies it.
        assert!(marked.name.as_deref().is_some_and(|name| name.ends_with(" R")));

        // Both annotations and their popups.
        assert_eq!(annots_len(&written, 1), 4);
    }

    #[test]
    fn rewriting_replaces_comments_and_keeps_foreign_annotations() {
        let pdf = sample_pdf(1, [0, 0, 612, 792]);
        let mut doc = Document::load_mem(&pdf).unwrap();
        let page_id = doc.get_pages().into_values().next().unwrap();
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        });
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Annots", vec![Object::Reference(link_id)]);
        let mut with_link = Vec::new();
        doc.save_to(&mut with_link).unwrap();

        let first = LopdfPersistence
            .write(
                &with_link,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![comment(100.0, 700.0, "one"), comment(200.0, 700.0, "two")],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();
        assert_eq!(annots_len(&first, 0), 5);

        let second = LopdfPersistence
            .write(
                &first,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![comment(100.0, 700.0, "one, edited")],
                    replaces: vec!["one".into(), "two".into()],
                }],
            )
            .unwrap();
        assert_eq!(annots_len(&second, 0), 3);
        let pages = LopdfPersistence.read(&second).unwrap();
        assert_eq!(pages[0].annotations.len(), 1);
        assert_eq!(pages[0].annotations[0].contents, "one, edited");
    }

    #[test]
    fn rewrite_keeps_annotations_the_store_does_not_own() {
        let pdf = sample_pdf(1, [0, 0, 612, 792]);
        let bare = NativeAnnotation {
            contents: String::new(),
            ..highlight()
        };
        let first = LopdfPersistence
            .write(
                &pdf,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![bare],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();
        assert_eq!(annots_len(&first, 0), 2);
        let key = LopdfPersistence.read(&first).unwrap()[0].annotations[0]
            .name
            .clone()
            .unwrap();

        let second = LopdfPersistence
            .write(
                &first,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![comment(300.0, 500.0, "note")],
                    replaces: vec!["note".into()],
                }],
            )
            .unwrap();
        assert_eq!(annots_len(&second, 0), 4);
        let pages = LopdfPersistence.read(&second).unwrap();
        assert_eq!(pages[0].annotations.len(), 2);
        assert!(pages[0]
            .annotations
            .iter()
            .any(|a| a.kind == NativeKind::Highlight && a.contents.is_empty()));

        let third = LopdfPersistence
            .write(
                &second,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: Vec::new(),
                    replaces: vec![key],
                }],
            )
            .unwrap();
        assert_eq!(annots_len(&third, 0), 2);
        let pages = LopdfPersistence.read(&third).unwrap();
        assert_eq!(pages[0].annotations.len(), 1);
        assert_eq!(pages[0].annotations[0].kind, NativeKind::Text);
    }

    #[test]
    fn highlights_carry_a_linked_popup() {
        let pdf = sample_pdf(1, [0, 0, 612, 792]);
        let written = LopdfPersistence
            .write(
                &pdf,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![highlight()],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();

        let doc = Document::load_mem(&written).unwrap();
        let page_id = doc.get_pages().into_values().next().unwrap();
        let (highlight_id, dict) = page_annotations(&doc, page_id)
            .iter()
            .filter_map(|entry| entry.as_reference().ok())
            .filter_map(|id| {
                doc.get_object(id)
                    .and_then(Object::as_dict)
                    .ok()
                    .map(|dict| (id, dict))
            })
            .find(|(_, dict)| native_kind(dict) == Some(NativeKind::Highlight))
            .unwrap();
        let popup_id = dict.get(b"Popup").and_then(Object::as_reference).unwrap();
        let popup = doc.get_object(popup_id).and_then(Object::as_dict).unwrap();
        assert_eq!(subtype(popup), Some(b"Popup".as_slice()));
        assert_eq!(
            popup.get(b"Parent").and_then(Object::as_reference).unwrap(),
            highlight_id
        );
        let rect = rect_from(&doc, popup.get(b"Rect").unwrap()).unwrap();
        assert_eq!(rect, PdfRect::new(272.0, 520.0, 452.0, 700.0));
    }

    #[test]
    fn store_round_trips_through_lopdf() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let pdf = sample_pdf(2, [0, 0, 612, 792]);
        // Written by another viewer: nothing carries a name.
        let foreign = LopdfPersistence
            .write(
                &pdf,
                &[
                    PageAnnotations {
                        page_index: 0,
                        annotations: vec![NativeAnnotation {
                            contents: String::new(),
                            ..highlight()
                        }],
                        replaces: Vec::new(),
                    },
                    PageAnnotations {
                        page_index: 1,
                        annotations: vec![NativeAnnotation {
                            name: None,
                            ..comment(100.0, 700.0, "Check figure")
                        }],
                        replaces: Vec::new(),
                    },
                ],
            )
            .unwrap();

        let pages = LopdfPersistence.read(&foreign).unwrap();
        let mut store = AnnotationStore::new();
        assert_eq!(store.import(Side::Left, &pages, now), 1);
        store.add_highlight(
            Side::Left,
            1,
            vec![PercentRect::from_edges(10.0, 20.0, 50.0, 22.0)],
            Some("quoted".into()),
            "Ada",
            now,
        );
        store.add_comment(Side::Left, 2, 25.0, 40.0, Vec::new(), None);
        store.set_draft_text("Second look").unwrap();
        store.save_comment("Ada", now).unwrap();

        let exported = LopdfPersistence
            .write(&foreign, &store.native_pages(Side::Left, &pages, now))
            .unwrap();
        let reread = LopdfPersistence.read(&exported).unwrap();
        assert_eq!(reread[0].annotations.len(), 2);
        assert!(reread[0]
            .annotations
            .iter()
            .all(|a| a.kind == NativeKind::Highlight));
        let mut texts: Vec<&str> = reread[1]
            .annotations
            .iter()
            .map(|a| a.contents.as_str())
            .collect();
        texts.sort_unstable();
        assert_eq!(texts, ["Check figure", "Second look"]);

        let mut fresh = AnnotationStore::new();
        assert_eq!(fresh.import(Side::Left, &reread, now), 2);
        for text in ["Check figure", "Second look"] {
            let before = store.for_page(Side::Left, 2);
            let after = fresh.for_page(Side::Left, 2);
            let before = before.iter().find(|a| a.text == text).unwrap();
            let after = after.iter().find(|a| a.text == text).unwrap();
            assert!((before.x - after.x).abs() < 0.01, "{text}: x drifted");
            assert!((before.y - after.y).abs() < 0.01, "{text}: y drifted");
        }

        let again = LopdfPersistence
            .write(&exported, &fresh.native_pages(Side::Left, &reread, now))
            .unwrap();
        let pages = LopdfPersistence.read(&again).unwrap();
        assert_eq!(pages[0].annotations.len(), 2);
        assert_eq!(pages[1].annotations.len(), 2);
        assert_eq!(annots_len(&again, 0), 4);
        assert_eq!(annots_len(&again, 1), 4);
    }

    #[test]
    fn media_box_origin_is_normalized() {
        let pdf = sample_pdf(1, [10, 20, 622, 812]);
        let written = LopdfPersistence
            .write(
                &pdf,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![comment(0.0, 24.0, "corner")],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();

        let doc = Document::load_mem(&written).unwrap();
        let page_id = doc.get_pages().into_values().next().unwrap();
        let stored = page_annotations(&doc, page_id)
            .iter()
            .filter_map(|entry| resolve(&doc, entry).and_then(|o| o.as_dict().ok()))
            .find(|dict| native_kind(dict) == Some(NativeKind::Text))
            .and_then(|dict| rect_from(&doc, dict.get(b"Rect").unwrap()))
            .unwrap();
        assert_eq!(stored, PdfRect::new(10.0, 20.0, 34.0, 44.0));

        let pages = LopdfPersistence.read(&written).unwrap();
        assert_eq!(pages[0].width, 612.0);
        assert_eq!(pages[0].height, 792.0);
        assert_eq!(pages[0].annotations[0].rect, PdfRect::new(0.0, 0.0, 24.0, 24.0));
    }

    #[test]
    fn unicode_contents_survive() {
        let pdf = sample_pdf(1, [0, 0, 612, 792]);
        let written = LopdfPersistence
            .write(
                &pdf,
                &[PageAnnotations {
                    page_index: 0,
                    annotations: vec![comment(50.0, 500.0, "Prüfen ✓")],
                    replaces: Vec::new(),
                }],
            )
            .unwrap();
        let pages = LopdfPersistence.read(&written).unwrap();
        assert_eq!(pages[0].annotations[0].contents, "Prüfen ✓");
    }

    #[test]
    fn invalid_input_is_reported() {
        assert!(matches!(
            LopdfPersistence.read(b"not a pdf"),
            Err(PersistError::Malformed(_))
        ));
        let pdf = sample_pdf(1, [0, 0, 612, 792]);
        assert_eq!(
            LopdfPersistence.write(
                &pdf,
                &[PageAnnotations {
                    page_index: 3,
                    annotations: Vec::new(),
                    replaces: Vec::new(),
                }],
            ),
            Err(PersistError::PageOutOfRange(3))
        );
    }
}

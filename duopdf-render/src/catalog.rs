//! Named destinations, resolved once per document from the catalog.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::persist::decode_text;

/// Guards against name trees whose /Kids loop back on themselves.
const MAX_TREE_DEPTH: usize = 32;

/// Every named destination of the document mapped to its 0-based page index.
/// Both the legacy /Dests dictionary and the /Names name tree are read;
/// names whose target is not a page of this document are skipped.
pub fn named_destinations(bytes: &[u8]) -> HashMap<String, usize> {
    let doc = match Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(err) => {
            debug!(%err, "catalog unreadable; no named destinations");
            return HashMap::new();
        }
    };
    let pages: HashMap<ObjectId, usize> = doc
        .get_pages()
        .into_values()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();

    let mut out = HashMap::new();
    let Some(catalog) = doc.catalog().ok() else {
        return out;
    };

    if let Some(dests) = dict_at(&doc, catalog, b"Dests") {
        for (name, value) in dests.iter() {
            if let Some(page) = destination_page(&doc, value, &pages) {
                out.insert(String::from_utf8_lossy(name).into_owned(), page);
            }
        }
    }
    if let Some(tree) = dict_at(&doc, catalog, b"Names").and_then(|n| dict_at(&doc, n, b"Dests")) {
        walk_name_tree(&doc, tree, &pages, 0, &mut out);
    }
    out
}

fn deref<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn dict_at<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    deref(doc, dict.get(key).ok()?)?.as_dict().ok()
}

/// An explicit destination array, or a dictionary carrying one under /D.
fn destination_page(
    doc: &Document,
    value: &Object,
    pages: &HashMap<ObjectId, usize>,
) -> Option<usize> {
    let value = deref(doc, value)?;
    let array = match value {
        Object::Array(array) => array,
        Object::Dictionary(dict) => deref(doc, dict.get(b"D").ok()?)?.as_array().ok()?,
        _ => return None,
    };
    match array.first()? {
        Object::Reference(page_id) => pages.get(page_id).copied(),
        Object::Integer(index) => usize::try_from(*index)
            .ok()
            .filter(|i| *i < pages.len()),
        _ => None,
    }
}

fn walk_name_tree(
    doc: &Document,
    node: &Dictionary,
    pages: &HashMap<ObjectId, usize>,
    depth: usize,
    out: &mut HashMap<String, usize>,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    if let Some(names) = node
        .get(b"Names")
        .ok()
        .and_then(|n| deref(doc, n))
        .and_then(|n| n.as_array().ok())
    {
        for pair in names.chunks_exact(2) {
            let Some(Object::String(key, _)) = deref(doc, &pair[0]) else {
                continue;
            };
            if let Some(page) = destination_page(doc, &pair[1], pages) {
                out.insert(decode_text(key), page);
            }
        }
    }
    if let Some(kids) = node
        .get(b"Kids")
        .ok()
        .and_then(|k| deref(doc, k))
        .and_then(|k| k.as_array().ok())
    {
        for kid in kids {
            if let Some(child) = deref(doc, kid).and_then(|k| k.as_dict().ok()) {
                walk_name_tree(doc, child, pages, depth + 1, out);
            }
        }
    }
}

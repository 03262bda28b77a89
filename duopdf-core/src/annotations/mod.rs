//! Comment and highlight records shared by both panes.

pub mod native;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AnnotationError;
use crate::geometry::PercentRect;
use crate::pane::Side;

use native::{
    comment_position, comment_rect, format_pdf_date, highlight_quads, highlight_rects,
    import_timestamp, iso_timestamp, NativeAnnotation, NativeKind, NativePage, PageAnnotations,
};

pub const IMPORTED_PREFIX: &str = "imported-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub side: Side,
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub text: String,
    #[serde(default)]
    pub highlight_rects: Vec<PercentRect>,
    pub author: String,
    pub timestamp: String,
    #[serde(default)]
    pub selected_text: Option<String>,
}

impl Annotation {
    pub fn is_highlight(&self) -> bool {
        !self.highlight_rects.is_empty()
    }

    pub fn is_imported(&self) -> bool {
        self.id.starts_with(IMPORTED_PREFIX)
    }

    /// Native object for this annotation on a page of `width` x `height`
    /// points, named after the annotation id.
    pub fn to_native(&self, width: f64, height: f64, now: DateTime<Utc>) -> NativeAnnotation {
        let modified = Some(format_pdf_date(&self.timestamp, now));
        let author = Some(self.author.clone());
        match highlight_quads(&self.highlight_rects, width, height) {
            Some((rect, quad_points)) => NativeAnnotation {
                kind: NativeKind::Highlight,
                rect,
                quad_points,
                contents: self.text.clone(),
                author,
                modified,
                name: Some(self.id.clone()),
            },
            None => NativeAnnotation {
                kind: NativeKind::Text,
                rect: comment_rect(self.x, self.y, width, height),
                quad_points: Vec::new(),
                contents: self.text.clone(),
                author,
                modified,
                name: Some(self.id.clone()),
            },
        }
    }
}

/// A comment being written or edited. Nothing reaches the store until the
/// draft is saved with non-empty text.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentDraft {
    /// Set when an existing comment was reopened for editing.
    pub id: Option<String>,
    pub side: Side,
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub highlight_rects: Vec<PercentRect>,
    pub selected_text: Option<String>,
    pub text: String,
}

/// Where an imported annotation came from in its document.
#[derive(Debug, Clone, PartialEq)]
struct NativeOrigin {
    side: Side,
    page: usize,
    name: String,
}

#[derive(Debug, Default)]
pub struct AnnotationStore {
    annotations: BTreeMap<String, Annotation>,
    draft: Option<CommentDraft>,
    dirty: HashSet<Side>,
    /// Keyed by annotation id; outlives deletion so export still removes
    /// the native original.
    origins: BTreeMap<String, NativeOrigin>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.annotations.get(id)
    }

    /// Annotations of one side ordered by page, then top to bottom.
    pub fn for_side(&self, side: Side) -> Vec<&Annotation> {
        let mut list: Vec<&Annotation> =
            self.annotations.values().filter(|a| a.side == side).collect();
        list.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
                .then(a.id.cmp(&b.id))
        });
        list
    }

    pub fn for_page(&self, side: Side, page: usize) -> Vec<&Annotation> {
        self.for_side(side)
            .into_iter()
            .filter(|a| a.page == page)
            .collect()
    }

    pub fn all(&self) -> Vec<Annotation> {
        self.annotations.values().cloned().collect()
    }

    pub fn is_dirty(&self, side: Side) -> bool {
        self.dirty.contains(&side)
    }

    pub fn mark_clean(&mut self, side: Side) {
        self.dirty.remove(&side);
    }

    fn next_id(&self, side: Side, now: DateTime<Utc>) -> String {
        let base = format!("{}-{}", side, now.timestamp_millis());
        if !self.annotations.contains_key(&base) {
            return base;
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.annotations.contains_key(candidate))
            .unwrap_or(base)
    }

    /// Opens a new draft, discarding any unsaved one.
    pub fn add_comment(
        &mut self,
        side: Side,
        page: usize,
        x: f64,
        y: f64,
        highlight_rects: Vec<PercentRect>,
        selected_text: Option<String>,
    ) -> &CommentDraft {
        if let Some(discarded) = self.draft.take() {
            debug!(page = discarded.page, "discarding unsaved comment draft");
        }
        self.draft.insert(CommentDraft {
            id: None,
            side,
            page,
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
            highlight_rects,
            selected_text,
            text: String::new(),
        })
    }

    /// Reopens a saved comment as a draft carrying its current text.
    pub fn edit_comment(&mut self, id: &str) -> Result<&CommentDraft, AnnotationError> {
        let existing = self
            .annotations
            .get(id)
            .ok_or_else(|| AnnotationError::UnknownId(id.to_string()))?;
        let draft = CommentDraft {
            id: Some(existing.id.clone()),
            side: existing.side,
            page: existing.page,
            x: existing.x,
            y: existing.y,
            highlight_rects: existing.highlight_rects.clone(),
            selected_text: existing.selected_text.clone(),
            text: existing.text.clone(),
        };
        Ok(self.draft.insert(draft))
    }

    pub fn draft(&self) -> Option<&CommentDraft> {
        self.draft.as_ref()
    }

    pub fn set_draft_text(&mut self, text: impl Into<String>) -> Result<(), AnnotationError> {
        let draft = self.draft.as_mut().ok_or(AnnotationError::NoDraft)?;
        draft.text = text.into();
        Ok(())
    }

    pub fn cancel_draft(&mut self) -> Option<CommentDraft> {
        self.draft.take()
    }

    /// Commits the draft. Blank text is rejected and the draft kept open.
    pub fn save_comment(
        &mut self,
        author: &str,
        now: DateTime<Utc>,
    ) -> Result<Annotation, AnnotationError> {
        let draft = self.draft.as_ref().ok_or(AnnotationError::NoDraft)?;
        if draft.text.trim().is_empty() {
            return Err(AnnotationError::EmptyComment);
        }
        let id = match &draft.id {
            Some(id) => id.clone(),
            None => self.next_id(draft.side, now),
        };
        let annotation = Annotation {
            id: id.clone(),
            side: draft.side,
            page: draft.page,
            x: draft.x,
            y: draft.y,
            text: draft.text.trim().to_string(),
            highlight_rects: draft.highlight_rects.clone(),
            author: author.to_string(),
            timestamp: iso_timestamp(now),
            selected_text: draft.selected_text.clone(),
        };
        self.draft = None;
        self.dirty.insert(annotation.side);
        self.annotations.insert(id, annotation.clone());
        Ok(annotation)
    }

    /// Stores a highlight-only annotation right away.
    pub fn add_highlight(
        &mut self,
        side: Side,
        page: usize,
        rects: Vec<PercentRect>,
        selected_text: Option<String>,
        author: &str,
        now: DateTime<Utc>,
    ) -> Annotation {
        let (x, y) = PercentRect::union_all(&rects).map_or((0.0, 0.0), |b| (b.left, b.top));
        let annotation = Annotation {
            id: self.next_id(side, now),
            side,
            page,
            x,
            y,
            text: String::new(),
            highlight_rects: rects,
            author: author.to_string(),
            timestamp: iso_timestamp(now),
            selected_text,
        };
        self.dirty.insert(side);
        self.annotations
            .insert(annotation.id.clone(), annotation.clone());
        annotation
    }

    pub fn delete_comment(&mut self, id: &str) -> Result<Annotation, AnnotationError> {
        let removed = self
            .annotations
            .remove(id)
            .ok_or_else(|| AnnotationError::UnknownId(id.to_string()))?;
        if self.draft.as_ref().and_then(|d| d.id.as_deref()) == Some(id) {
            self.draft = None;
        }
        self.dirty.insert(removed.side);
        Ok(removed)
    }

    /// Deletes everything belonging to `side`; used when its pane closes.
    pub fn remove_side(&mut self, side: Side) -> usize {
        let before = self.annotations.len();
        self.annotations.retain(|_, a| a.side != side);
        self.origins.retain(|_, origin| origin.side != side);
        if self.draft.as_ref().is_some_and(|d| d.side == side) {
            self.draft = None;
        }
        self.dirty.remove(&side);
        before - self.annotations.len()
    }

    /// Merges native annotations read from a freshly loaded document. Only
    /// Text and Highlight annotations with contents are taken; the side is
    /// not marked dirty. Named imports are remembered so export replaces
    /// them instead of duplicating them.
    pub fn import(&mut self, side: Side, pages: &[NativePage], now: DateTime<Utc>) -> usize {
        let mut imported = 0;
        for (index, page) in pages.iter().enumerate() {
            let number = index + 1;
            let mut n = 0;
            for native in &page.annotations {
                if native.contents.trim().is_empty() {
                    continue;
                }
                let (x, y, rects) = match native.kind {
                    NativeKind::Text => {
                        let (x, y) = comment_position(&native.rect, page.width, page.height);
                        (x, y, Vec::new())
                    }
                    NativeKind::Highlight => {
                        let rects = highlight_rects(native, page.width, page.height);
                        let (x, y) = PercentRect::union_all(&rects)
                            .map_or((0.0, 0.0), |b| (b.left, b.top));
                        (x, y, rects)
                    }
                };
                let id = format!("{IMPORTED_PREFIX}{side}-{number}-{n}");
                n += 1;
                if let Some(name) = &native.name {
                    self.origins.insert(
                        id.clone(),
                        NativeOrigin {
                            side,
                            page: number,
                            name: name.clone(),
                        },
                    );
                }
                self.annotations.insert(
                    id.clone(),
                    Annotation {
                        id,
                        side,
                        page: number,
                        x: x.clamp(0.0, 100.0),
                        y: y.clamp(0.0, 100.0),
                        text: native.contents.clone(),
                        highlight_rects: rects,
                        author: native
                            .author
                            .clone()
                            .filter(|a| !a.trim().is_empty())
                            .unwrap_or_else(|| "Unknown".to_string()),
                        timestamp: import_timestamp(native.modified.as_deref(), now),
                        selected_text: None,
                    },
                );
                imported += 1;
            }
        }
        imported
    }

    /// Restores annotations from a backup; affected sides become dirty since
    /// the document itself does not carry them.
    pub fn restore(&mut self, annotations: Vec<Annotation>) -> usize {
        let count = annotations.len();
        for annotation in annotations {
            self.dirty.insert(annotation.side);
            self.annotations.insert(annotation.id.clone(), annotation);
        }
        count
    }

    /// Native annotations for every page of `side`, given each page's size.
    ///
    /// Every page is listed with the names it replaces: the native originals
    /// of imported annotations, including deleted ones, and anything written
    /// by an earlier export of this store. Imported annotations keep their
    /// original name.
    pub fn native_pages(
        &self,
        side: Side,
        pages: &[NativePage],
        now: DateTime<Utc>,
    ) -> Vec<PageAnnotations> {
        let mut out: Vec<PageAnnotations> = (0..pages.len())
            .map(|page_index| PageAnnotations {
                page_index,
                annotations: Vec::new(),
                replaces: Vec::new(),
            })
            .collect();
        for origin in self.origins.values().filter(|o| o.side == side) {
            if let Some(page) = origin.page.checked_sub(1).and_then(|i| out.get_mut(i)) {
                page.replaces.push(origin.name.clone());
            }
        }
        for annotation in self.for_side(side) {
            let Some(page) = annotation.page.checked_sub(1).and_then(|i| pages.get(i)) else {
                warn!(
                    id = %annotation.id,
                    page = annotation.page,
                    "annotation refers to a page outside the document"
                );
                continue;
            };
            let mut native = annotation.to_native(page.width, page.height, now);
            if let Some(origin) = self.origins.get(&annotation.id) {
                native.name = Some(origin.name.clone());
            }
            let target = &mut out[annotation.page - 1];
            if let Some(name) = &native.name {
                if !target.replaces.contains(name) {
                    target.replaces.push(name.clone());
                }
            }
            target.annotations.push(native);
        }
        out
    }
}

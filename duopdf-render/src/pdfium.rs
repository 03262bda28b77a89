use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use duopdf_core::{
    CancelToken, DocumentEngine, EngineDocument, EngineError, LinkAction, LinkDefinition,
    NormalizedRect, OutlineItem, PageSize, Surface, TextFragment,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{instrument, warn};

use crate::catalog::named_destinations;

/// Runtime override for the location of the pdfium shared library.
pub const PDFIUM_LIBRARY_ENV: &str = "DUOPDF_PDFIUM_LIBRARY_PATH";

pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentEngine for PdfiumEngine {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn load(&self, bytes: Bytes) -> Result<Arc<dyn EngineDocument>, EngineError> {
        let document = PdfiumDocument::open(Arc::clone(&self.pdfium), &bytes)?;
        Ok(Arc::new(document))
    }
}

fn engine_error(err: PdfiumError) -> EngineError {
    EngineError::Other(err.to_string())
}

struct PdfiumDocument {
    // Declared before `_pdfium` so it is dropped first.
    document: Mutex<PdfDocument<'static>>,
    page_sizes: Vec<PageSize>,
    destinations: HashMap<String, usize>,
    outline_cache: Mutex<Option<Vec<OutlineItem>>>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn open(pdfium: Arc<Pdfium>, bytes: &Bytes) -> Result<Self, EngineError> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes.to_vec(), None)
            .map_err(|err| EngineError::Malformed(err.to_string()))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Both
        // end up in the same struct, the Arc keeps the bindings at a stable
        // address, and `document` is declared (and so dropped) before
        // `_pdfium`, so the borrow never outlives its target.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_sizes = document
            .pages()
            .iter()
            .map(|page| PageSize::new(page.width().value, page.height().value))
            .collect();
        Ok(Self {
            document: Mutex::new(document),
            page_sizes,
            destinations: named_destinations(bytes),
            outline_cache: Mutex::new(None),
            _pdfium: pdfium,
        })
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R, EngineError>,
    {
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| EngineError::PageOutOfRange(page_index))?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(index)
            .map_err(|_| EngineError::PageOutOfRange(page_index))?;
        f(&page)
    }
}

/// 0-based page a destination points at.
fn page_of(destination: &PdfDestination<'_>) -> Option<usize> {
    destination.page_index().ok().map(|index| index as usize)
}

/// What following `link` should do: its action when it has a usable one,
/// else its bare destination.
fn link_target(link: &PdfLink<'_>) -> Option<LinkAction> {
    link.action()
        .and_then(|action| action_target(&action))
        .or_else(|| {
            link.destination()
                .as_ref()
                .and_then(page_of)
                .map(|page_index| LinkAction::GoTo { page_index })
        })
}

fn action_target(action: &PdfAction<'_>) -> Option<LinkAction> {
    match action.action_type() {
        PdfActionType::GoToDestinationInSameDocument => action
            .as_local_destination_action()?
            .destination()
            .ok()
            .as_ref()
            .and_then(page_of)
            .map(|page_index| LinkAction::GoTo { page_index }),
        PdfActionType::Uri => action
            .as_uri_action()?
            .uri()
            .ok()
            .filter(|uri| !uri.is_empty())
            .map(|uri| LinkAction::Uri { uri }),
        _ => None,
    }
}

/// Page-space rect to a top-left origin rect in page units.
fn normalized(rect: &PdfRect, page_width: f32, page_height: f32) -> NormalizedRect {
    NormalizedRect {
        left: rect.left().value / page_width,
        right: rect.right().value / page_width,
        top: 1.0 - rect.top().value / page_height,
        bottom: 1.0 - rect.bottom().value / page_height,
    }
    .clamp()
}

impl EngineDocument for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize, EngineError> {
        self.page_sizes
            .get(page_index)
            .copied()
            .ok_or(EngineError::PageOutOfRange(page_index))
    }

    #[instrument(skip(self, cancel))]
    fn render_page(
        &self,
        page_index: usize,
        scale: f32,
        cancel: &CancelToken,
    ) -> Result<Surface, EngineError> {
        cancel.check()?;
        self.with_page(page_index, |page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.1));
            let bitmap = page.render_with_config(&config).map_err(engine_error)?;
            cancel.check()?;
            let image = bitmap.as_image().to_rgba8();
            let (width, height) = image.dimensions();
            Ok(Surface {
                width,
                height,
                pixels: image.into_raw(),
            })
        })
    }

    fn text_content(&self, page_index: usize) -> Result<Vec<TextFragment>, EngineError> {
        self.with_page(page_index, |page| {
            let text = page.text().map_err(engine_error)?;
            let fragments = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let content = segment.text();
                    if content.is_empty() {
                        return None;
                    }
                    let bounds = segment.bounds();
                    let left = bounds.left().value;
                    let bottom = bounds.bottom().value;
                    Some(TextFragment::new(
                        content,
                        left,
                        bottom,
                        bounds.right().value - left,
                        bounds.top().value - bottom,
                    ))
                })
                .collect();
            Ok(fragments)
        })
    }

    fn outline(&self) -> Result<Vec<OutlineItem>, EngineError> {
        {
            let cache = self.outline_cache.lock();
            if let Some(cached) = cache.as_ref() {
                return Ok(cached.clone());
            }
        }

        let outline = {
            let document = self.document.lock();
            document
                .bookmarks()
                .root()
                .map(flatten_outline)
                .unwrap_or_default()
        };

        *self.outline_cache.lock() = Some(outline.clone());
        Ok(outline)
    }

    fn destination(&self, name: &str) -> Option<usize> {
        self.destinations.get(name).copied()
    }

    fn links(&self, page_index: usize) -> Result<Vec<LinkDefinition>, EngineError> {
        self.with_page(page_index, |page| {
            let page_width = page.width().value;
            let page_height = page.height().value;
            if page_width <= 0.0 || page_height <= 0.0 {
                return Ok(Vec::new());
            }

            let mut definitions = Vec::new();
            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => normalized(&rect, page_width, page_height),
                    Err(err) => {
                        warn!(?err, page = page_index, "failed to resolve link rectangle");
                        continue;
                    }
                };
                if !rect.is_valid() {
                    continue;
                }
                let Some(action) = link_target(&link) else {
                    continue;
                };
                definitions.push(LinkDefinition {
                    rects: vec![rect],
                    action,
                });
            }
            Ok(definitions)
        })
    }
}

/// A node of a document outline.
trait OutlineNode: Sized {
    fn title(&self) -> Option<String>;
    fn page_index(&self) -> Option<usize>;
    fn first_child(&self) -> Option<Self>;
    fn next_sibling(&self) -> Option<Self>;
}

impl<'a> OutlineNode for PdfBookmark<'a> {
    fn title(&self) -> Option<String> {
        PdfBookmark::title(self)
    }

    fn page_index(&self) -> Option<usize> {
        self.destination().as_ref().and_then(page_of)
    }

    fn first_child(&self) -> Option<Self> {
        PdfBookmark::first_child(self)
    }

    fn next_sibling(&self) -> Option<Self> {
        PdfBookmark::next_sibling(self)
    }
}

/// Outline entries in reading order, each with its nesting depth. Entries
/// without a title or a resolvable page are skipped but their children are
/// kept.
fn flatten_outline<N: OutlineNode>(root: N) -> Vec<OutlineItem> {
    let mut items = Vec::new();
    let mut pending = vec![(root, 0)];
    while let Some((node, depth)) = pending.pop() {
        if let Some(sibling) = node.next_sibling() {
            pending.push((sibling, depth));
        }
        if let Some(child) = node.first_child() {
            pending.push((child, depth + 1));
        }
        if let (Some(title), Some(page_index)) = (node.title(), node.page_index()) {
            items.push(OutlineItem {
                title,
                page_index,
                depth,
            });
        }
    }
    items
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(PDFIUM_LIBRARY_ENV).ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {PDFIUM_LIBRARY_ENV}={path}: {err}");
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {PDFIUM_LIBRARY_ENV} or install it ({})",
                errors.join(", ")
            ))
        }
    }
}

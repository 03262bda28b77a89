//! In-memory stand-ins for the document engine and the persistence library.
//!
//! The fake "PDF" is a magic header followed by JSON describing each page's
//! size and native annotations, which is enough for both fakes to agree on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::annotations::native::{AnnotationPersistence, NativePage, PageAnnotations};
use crate::engine::{
    CancelToken, DocumentEngine, EngineDocument, LinkDefinition, OutlineItem, PageSize, Surface,
    TextFragment,
};
use crate::error::{EngineError, PersistError};

const MAGIC: &[u8] = b"%PDF-FAKE\n";

pub(crate) const LETTER: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

fn body_text(page: usize) -> Vec<TextFragment> {
    vec![TextFragment::new(
        format!("Page {page} body text"),
        72.0,
        700.0,
        200.0,
        12.0,
    )]
}

pub(crate) struct FakeDocument {
    sizes: Vec<PageSize>,
    text: Vec<Vec<TextFragment>>,
    outline: Vec<OutlineItem>,
    destinations: HashMap<String, usize>,
    links: HashMap<usize, Vec<LinkDefinition>>,
    failing: HashSet<usize>,
    render_calls: AtomicUsize,
}

impl FakeDocument {
    pub(crate) fn with_sizes(sizes: Vec<PageSize>) -> Self {
        let text = (1..=sizes.len()).map(body_text).collect();
        Self {
            sizes,
            text,
            outline: Vec::new(),
            destinations: HashMap::new(),
            links: HashMap::new(),
            failing: HashSet::new(),
            render_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_pages(count: usize) -> Self {
        Self::with_sizes(vec![LETTER; count])
    }

    /// One page per entry, one line per string, stacked top to bottom.
    pub(crate) fn with_text(pages: &[&[&str]]) -> Self {
        let mut document = Self::with_pages(pages.len());
        document.text = pages
            .iter()
            .map(|lines| {
                lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| {
                        let width = line.chars().count() as f32 * 6.0;
                        TextFragment::new(*line, 72.0, 700.0 - i as f32 * 20.0, width, 12.0)
                    })
                    .collect()
            })
            .collect();
        document
    }

    pub(crate) fn outline(mut self, outline: Vec<OutlineItem>) -> Self {
        self.outline = outline;
        self
    }

    pub(crate) fn destination(mut self, name: &str, page_index: usize) -> Self {
        self.destinations.insert(name.to_string(), page_index);
        self
    }

    pub(crate) fn link(mut self, page_index: usize, link: LinkDefinition) -> Self {
        self.links.entry(page_index).or_default().push(link);
        self
    }

    pub(crate) fn failing_page(mut self, page_index: usize) -> Self {
        self.failing.insert(page_index);
        self
    }

    pub(crate) fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn into_shared(self) -> Arc<dyn EngineDocument> {
        Arc::new(self)
    }

    fn size(&self, page_index: usize) -> Result<PageSize, EngineError> {
        self.sizes
            .get(page_index)
            .copied()
            .ok_or(EngineError::PageOutOfRange(page_index))
    }
}

impl EngineDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize, EngineError> {
        self.size(page_index)
    }

    fn render_page(
        &self,
        page_index: usize,
        scale: f32,
        cancel: &CancelToken,
    ) -> Result<Surface, EngineError> {
        cancel.check()?;
        let size = self.size(page_index)?;
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&page_index) {
            return Err(EngineError::Other("corrupt content stream".into()));
        }
        let (width, height) = size.viewport(scale).pixel_dimensions(1.0);
        cancel.check()?;
        Ok(Surface {
            width,
            height,
            pixels: vec![0xff; width as usize * height as usize * 4],
        })
    }

    fn text_content(&self, page_index: usize) -> Result<Vec<TextFragment>, EngineError> {
        self.text
            .get(page_index)
            .cloned()
            .ok_or(EngineError::PageOutOfRange(page_index))
    }

    fn outline(&self) -> Result<Vec<OutlineItem>, EngineError> {
        Ok(self.outline.clone())
    }

    fn destination(&self, name: &str) -> Option<usize> {
        self.destinations.get(name).copied()
    }

    fn links(&self, page_index: usize) -> Result<Vec<LinkDefinition>, EngineError> {
        Ok(self.links.get(&page_index).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FakePdf {
    pages: Vec<NativePage>,
    /// Lines per page; when empty every page gets a single body line.
    #[serde(default)]
    text: Vec<Vec<String>>,
    #[serde(default)]
    outline: Vec<(String, usize)>,
}

fn decode(bytes: &[u8]) -> Result<FakePdf, String> {
    let body = bytes
        .strip_prefix(MAGIC)
        .ok_or_else(|| "missing %PDF header".to_string())?;
    serde_json::from_slice(body).map_err(|err| err.to_string())
}

fn encode(pdf: &FakePdf) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend(serde_json::to_vec(pdf).unwrap_or_default());
    out
}

fn blank_pages(sizes: &[PageSize]) -> Vec<NativePage> {
    sizes
        .iter()
        .map(|size| NativePage {
            width: f64::from(size.width),
            height: f64::from(size.height),
            annotations: Vec::new(),
        })
        .collect()
}

pub(crate) fn fake_pdf_with(pages: Vec<NativePage>) -> Bytes {
    Bytes::from(encode(&FakePdf {
        pages,
        ..FakePdf::default()
    }))
}

pub(crate) fn fake_pdf(page_count: usize) -> Bytes {
    fake_pdf_sized(&vec![LETTER; page_count])
}

pub(crate) fn fake_pdf_sized(sizes: &[PageSize]) -> Bytes {
    fake_pdf_with(blank_pages(sizes))
}

/// Letter pages carrying the given lines of text.
pub(crate) fn fake_pdf_text(pages: &[&[&str]]) -> Bytes {
    Bytes::from(encode(&FakePdf {
        pages: blank_pages(&vec![LETTER; pages.len()]),
        text: pages
            .iter()
            .map(|lines| lines.iter().map(|line| line.to_string()).collect())
            .collect(),
        outline: Vec::new(),
    }))
}

pub(crate) fn fake_pdf_outlined(page_count: usize, outline: &[(&str, usize)]) -> Bytes {
    Bytes::from(encode(&FakePdf {
        pages: blank_pages(&vec![LETTER; page_count]),
        text: Vec::new(),
        outline: outline
            .iter()
            .map(|(title, index)| (title.to_string(), *index))
            .collect(),
    }))
}

/// Parses the fake format into a [`FakeDocument`].
pub(crate) struct FakeEngine;

#[async_trait]
impl DocumentEngine for FakeEngine {
    async fn load(&self, bytes: Bytes) -> Result<Arc<dyn EngineDocument>, EngineError> {
        let pdf = decode(&bytes).map_err(EngineError::Malformed)?;
        let sizes: Vec<PageSize> = pdf
            .pages
            .iter()
            .map(|page| PageSize::new(page.width as f32, page.height as f32))
            .collect();
        let mut document = FakeDocument::with_sizes(sizes.clone());
        if !pdf.text.is_empty() {
            let lines: Vec<Vec<&str>> = pdf
                .text
                .iter()
                .map(|page| page.iter().map(String::as_str).collect())
                .collect();
            let pages: Vec<&[&str]> = lines.iter().map(Vec::as_slice).collect();
            document = FakeDocument::with_text(&pages);
            document.sizes = sizes;
        }
        // Every outline entry doubles as a named destination.
        let mut outline = Vec::new();
        for (title, page_index) in pdf.outline {
            document = document.destination(&title, page_index);
            outline.push(OutlineItem {
                title,
                page_index,
                depth: 0,
            });
        }
        Ok(document.outline(outline).into_shared())
    }
}

#[derive(Default)]
pub(crate) struct FakePersistence {
    pub(crate) fail_writes: bool,
}

impl AnnotationPersistence for FakePersistence {
    fn read(&self, bytes: &[u8]) -> Result<Vec<NativePage>, PersistError> {
        decode(bytes)
            .map(|pdf| named_pages(pdf.pages))
            .map_err(PersistError::Malformed)
    }

    fn write(&self, bytes: &[u8], pages: &[PageAnnotations]) -> Result<Vec<u8>, PersistError> {
        if self.fail_writes {
            return Err(PersistError::Write("disk full".into()));
        }
        let mut pdf = decode(bytes).map_err(PersistError::Malformed)?;
        pdf.pages = named_pages(pdf.pages);
        for page in pages {
            let target = pdf
                .pages
                .get_mut(page.page_index)
                .ok_or(PersistError::PageOutOfRange(page.page_index))?;
            target.annotations.retain(|native| {
                native
                    .name
                    .as_ref()
                    .map_or(true, |name| !page.replaces.contains(name))
            });
            target.annotations.extend(page.annotations.iter().cloned());
        }
        Ok(encode(&pdf))
    }
}

/// Unnamed annotations are keyed by position, as a real document keys them
/// by object reference.
fn named_pages(mut pages: Vec<NativePage>) -> Vec<NativePage> {
    for (page_index, page) in pages.iter_mut().enumerate() {
        for (index, native) in page.annotations.iter_mut().enumerate() {
            if native.name.is_none() {
                native.name = Some(format!("annot-{page_index}-{index}"));
            }
        }
    }
    pages
}

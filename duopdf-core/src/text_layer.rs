//! Rendered text layer of a page and the per-page readiness signal.
//!
//! A text layer is what the user can see and select: one span per text
//! fragment, verbatim, with no reconstructed spacing. It therefore differs
//! from the extracted search text, which is why search highlighting has to
//! reconcile the two.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::engine::{PageSize, TextFragment};
use crate::geometry::PercentRect;

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub rect: PercentRect,
}

/// A sub-range of one span, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRange {
    pub span: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TextLayer {
    spans: Vec<TextSpan>,
    text: String,
    span_starts: Vec<usize>,
    char_len: usize,
}

impl TextLayer {
    pub fn new(spans: Vec<TextSpan>) -> Self {
        let mut text = String::new();
        let mut span_starts = Vec::with_capacity(spans.len());
        let mut char_len = 0;
        for span in &spans {
            span_starts.push(char_len);
            char_len += span.text.chars().count();
            text.push_str(&span.text);
        }
        Self {
            spans,
            text,
            span_starts,
            char_len,
        }
    }

    pub fn from_fragments(fragments: &[TextFragment], page: PageSize) -> Self {
        let width = f64::from(page.width);
        let height = f64::from(page.height);
        let spans = fragments
            .iter()
            .filter(|f| !f.text.is_empty())
            .map(|f| {
                let rect = if width > 0.0 && height > 0.0 {
                    let left = f64::from(f.x) / width * 100.0;
                    let right = f64::from(f.x + f.width) / width * 100.0;
                    let top = (height - f64::from(f.y + f.height)) / height * 100.0;
                    let bottom = (height - f64::from(f.y)) / height * 100.0;
                    PercentRect::from_edges(left, top, right, bottom)
                } else {
                    PercentRect::from_edges(0.0, 0.0, 0.0, 0.0)
                };
                TextSpan {
                    text: f.text.clone(),
                    rect,
                }
            })
            .collect();
        Self::new(spans)
    }

    /// Concatenated span text, as a DOM `textContent` would report it.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn spans(&self) -> &[TextSpan] {
        &self.spans
    }

    pub fn span(&self, index: usize) -> Option<&TextSpan> {
        self.spans.get(index)
    }

    /// Part of the span rect covered by `range`, apportioned by character
    /// position along the span's width.
    pub fn range_rect(&self, range: &SpanRange) -> Option<PercentRect> {
        let span = self.spans.get(range.span)?;
        let chars = span.text.chars().count();
        if chars == 0 || range.start >= range.end {
            return None;
        }
        let rect = span.rect;
        let start = range.start.min(chars) as f64 / chars as f64;
        let end = range.end.min(chars) as f64 / chars as f64;
        Some(PercentRect::from_edges(
            rect.left + rect.width * start,
            rect.top,
            rect.left + rect.width * end,
            rect.bottom,
        ))
    }

    /// Splits the character range `[offset, offset + len)` into per-span
    /// sub-ranges; a match may straddle several fragments.
    pub fn ranges_for(&self, offset: usize, len: usize) -> Vec<SpanRange> {
        let end = offset.saturating_add(len).min(self.char_len);
        let mut ranges = Vec::new();
        if offset >= end {
            return ranges;
        }
        for (index, span) in self.spans.iter().enumerate() {
            let span_start = self.span_starts[index];
            let span_end = span_start + span.text.chars().count();
            if span_end <= offset {
                continue;
            }
            if span_start >= end {
                break;
            }
            let start = offset.max(span_start) - span_start;
            let stop = end.min(span_end) - span_start;
            if stop > start {
                ranges.push(SpanRange {
                    span: index,
                    start,
                    end: stop,
                });
            }
        }
        ranges
    }
}

/// Publishes text layers as pages finish rendering and lets searches await
/// them instead of polling.
#[derive(Debug, Default)]
pub struct TextLayerRegistry {
    pages: Mutex<HashMap<usize, watch::Sender<Option<Arc<TextLayer>>>>>,
}

impl TextLayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, page: usize) -> watch::Sender<Option<Arc<TextLayer>>> {
        self.pages
            .lock()
            .entry(page)
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    pub fn publish(&self, page: usize, layer: Arc<TextLayer>) {
        self.sender(page).send_replace(Some(layer));
    }

    /// Drops the layer of an evicted page; waiters keep waiting for the next
    /// publication.
    pub fn clear(&self, page: usize) {
        if let Some(sender) = self.pages.lock().get(&page) {
            sender.send_replace(None);
        }
    }

    pub fn clear_all(&self) {
        for sender in self.pages.lock().values() {
            sender.send_replace(None);
        }
    }

    pub fn current(&self, page: usize) -> Option<Arc<TextLayer>> {
        self.pages
            .lock()
            .get(&page)
            .and_then(|sender| sender.borrow().clone())
    }

    /// Resolves once the page's text layer is attached, or `None` after
    /// `timeout`.
    pub async fn wait_ready(&self, page: usize, timeout: Duration) -> Option<Arc<TextLayer>> {
        let mut receiver = self.sender(page).subscribe();
        let wait = async {
            receiver
                .wait_for(|layer| layer.is_some())
                .await
                .ok()
                .and_then(|layer| layer.clone())
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

//! Contract between the viewer core and the document engine.
//!
//! The engine is a black box that parses bytes, reports page geometry, paints
//! pages into RGBA surfaces and streams text fragments. Page indices at this
//! boundary are 0-based; the rest of the core speaks 1-based page numbers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EngineError;

/// Page dimensions in PDF points at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn viewport(&self, scale: f32) -> Viewport {
        Viewport {
            width: self.width * scale,
            height: self.height * scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Raster dimensions for this viewport on a display with `pixel_ratio`.
    pub fn pixel_dimensions(&self, pixel_ratio: f32) -> (u32, u32) {
        let ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        let width = (self.width * ratio).ceil().max(1.0);
        let height = (self.height * ratio).ceil().max(1.0);
        (width as u32, height as u32)
    }
}

/// Cooperative cancellation flag shared between the scheduler and a running
/// render. Canceling is idempotent and safe after completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Convenience for engines: bail out with [`EngineError::Canceled`].
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_canceled() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// A painted page in RGBA8.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// One item of a page's text-content stream.
///
/// `x`/`y` is the baseline origin in PDF space (Y up), `width`/`height` the
/// advance and font height, all in points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub has_eol: bool,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            height,
            has_eol: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineItem {
    pub title: String,
    pub page_index: usize,
    pub depth: usize,
}

/// Rectangle in page-relative units (0.0..=1.0), origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn clamp(self) -> Self {
        let left = self.left.clamp(0.0, 1.0);
        let right = self.right.clamp(0.0, 1.0);
        let top = self.top.clamp(0.0, 1.0);
        let bottom = self.bottom.clamp(0.0, 1.0);
        Self {
            left: left.min(right),
            right: left.max(right),
            top: top.min(bottom),
            bottom: top.max(bottom),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.right > self.left && self.bottom > self.top
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    /// Internal jump; 0-based like every other index at this boundary.
    GoTo { page_index: usize },
    Uri { uri: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkDefinition {
    pub rects: Vec<NormalizedRect>,
    pub action: LinkAction,
}

#[async_trait]
pub trait DocumentEngine: Send + Sync {
    async fn load(&self, bytes: Bytes) -> Result<Arc<dyn EngineDocument>, EngineError>;
}

pub trait EngineDocument: Send + Sync {
    fn page_count(&self) -> usize;
    fn page_size(&self, page_index: usize) -> Result<PageSize, EngineError>;
    /// Paints the page; implementations must poll `cancel` between phases and
    /// return [`EngineError::Canceled`] once it is set.
    fn render_page(
        &self,
        page_index: usize,
        scale: f32,
        cancel: &CancelToken,
    ) -> Result<Surface, EngineError>;
    fn text_content(&self, page_index: usize) -> Result<Vec<TextFragment>, EngineError>;
    fn outline(&self) -> Result<Vec<OutlineItem>, EngineError>;
    fn destination(&self, name: &str) -> Option<usize>;
    fn links(&self, page_index: usize) -> Result<Vec<LinkDefinition>, EngineError>;
}

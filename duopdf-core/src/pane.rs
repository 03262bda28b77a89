//! One side of the viewer and everything it owns for its document.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{clamp_scale, Calibration, ZoomPreference};
use crate::document::DocumentHandle;
use crate::engine::{LinkAction, OutlineItem, PageSize};
use crate::error::RenderError;
use crate::geometry::ClientRect;
use crate::scheduler::{run_job, RenderJob, RenderScheduler, RenderedPage, SchedulerEvent};
use crate::search::{SearchEngine, SpacingRules, TextCache};
use crate::selection::PageContainer;
use crate::sync::{ScrollSnapshot, SyncCommand};
use crate::text_layer::TextLayerRegistry;
use crate::transform::{ScaleTransformController, SurfaceTransform, ZoomUpdate};
use crate::viewport::{PageLayout, ScrollAnchor, ViewportObserver, VisibilityChange, PAGE_GAP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Single,
    #[default]
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaneState {
    pub active_page: usize,
    pub scale: f32,
    pub view_mode: ViewMode,
}

/// Size of the pane's scrollable viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 1000.0,
        }
    }
}

pub fn fit_width_scale(viewport: ViewportSize, page: PageSize) -> f32 {
    if viewport.width <= 0.0 || page.width <= 0.0 {
        return 1.0;
    }
    let usable = (viewport.width - PAGE_GAP * 2.0).max(1.0);
    clamp_scale((usable / f64::from(page.width)) as f32)
}

pub fn fit_page_scale(viewport: ViewportSize, page: PageSize) -> f32 {
    if viewport.width <= 0.0 || viewport.height <= 0.0 || page.width <= 0.0 || page.height <= 0.0
    {
        return 1.0;
    }
    let usable_width = (viewport.width - PAGE_GAP * 2.0).max(1.0);
    let usable_height = (viewport.height - PAGE_GAP * 2.0).max(1.0);
    let width_ratio = usable_width / f64::from(page.width);
    let height_ratio = usable_height / f64::from(page.height);
    clamp_scale(width_ratio.min(height_ratio) as f32)
}

/// Outcome of one render step.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStep {
    pub page: usize,
    /// Set when the page was painted at a scale that is no longer current.
    pub correction: Option<SurfaceTransform>,
}

struct LoadedDocument {
    handle: DocumentHandle,
    scheduler: RenderScheduler,
    observer: ViewportObserver,
    zoom: ScaleTransformController,
    layout: PageLayout,
    search: Arc<SearchEngine>,
    layers: Arc<TextLayerRegistry>,
    surfaces: BTreeMap<usize, RenderedPage>,
}

impl LoadedDocument {
    fn drop_page(&mut self, page: usize) {
        self.surfaces.remove(&page);
        self.layers.clear(page);
        self.zoom.forget(page);
    }
}

pub struct Pane {
    side: Side,
    state: PaneState,
    viewport: ViewportSize,
    scroll_top: f64,
    scroll_left: f64,
    pixel_ratio: f32,
    calibration: Calibration,
    loaded: Option<LoadedDocument>,
}

impl Pane {
    pub fn new(side: Side, view_mode: ViewMode, pixel_ratio: f32, calibration: Calibration) -> Self {
        Self {
            side,
            state: PaneState {
                active_page: 1,
                scale: 1.0,
                view_mode,
            },
            viewport: ViewportSize::default(),
            scroll_top: 0.0,
            scroll_left: 0.0,
            pixel_ratio,
            calibration,
            loaded: None,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> PaneState {
        self.state
    }

    pub fn viewport(&self) -> ViewportSize {
        self.viewport
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        (self.scroll_top, self.scroll_left)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn document(&self) -> Option<&DocumentHandle> {
        self.loaded.as_ref().map(|l| &l.handle)
    }

    pub fn page_count(&self) -> usize {
        self.loaded.as_ref().map_or(0, |l| l.handle.page_count)
    }

    pub fn outline(&self) -> &[OutlineItem] {
        match &self.loaded {
            Some(loaded) => &loaded.handle.outline,
            None => &[],
        }
    }

    pub fn scheduler(&self) -> Option<&RenderScheduler> {
        self.loaded.as_ref().map(|l| &l.scheduler)
    }

    pub fn layout(&self) -> Option<&PageLayout> {
        self.loaded.as_ref().map(|l| &l.layout)
    }

    pub fn search_engine(&self) -> Option<Arc<SearchEngine>> {
        self.loaded.as_ref().map(|l| Arc::clone(&l.search))
    }

    pub fn text_layers(&self) -> Option<Arc<TextLayerRegistry>> {
        self.loaded.as_ref().map(|l| Arc::clone(&l.layers))
    }

    pub fn surface(&self, page: usize) -> Option<&RenderedPage> {
        self.loaded.as_ref().and_then(|l| l.surfaces.get(&page))
    }

    pub fn painted_pages(&self) -> Vec<usize> {
        self.loaded
            .as_ref()
            .map(|l| l.surfaces.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Installs a freshly loaded document, returning the one it replaces.
    pub fn load(&mut self, handle: DocumentHandle, zoom: ZoomPreference) -> Option<DocumentHandle> {
        let previous = self.close();
        let first = handle.page_size(1).unwrap_or(PageSize::new(612.0, 792.0));
        let scale = match zoom {
            ZoomPreference::Level(level) => clamp_scale(level),
            ZoomPreference::FitPage => fit_page_scale(self.viewport, first),
            ZoomPreference::FitWidth => fit_width_scale(self.viewport, first),
        };
        let sizes = handle.page_sizes().to_vec();
        let rules = SpacingRules {
            gap_ratio: self.calibration.space_gap_ratio,
            line_tolerance_ratio: self.calibration.line_tolerance_ratio,
        };
        let cache = Arc::new(TextCache::new(rules));
        debug!(side = %self.side, pages = handle.page_count, scale, "document installed");
        self.loaded = Some(LoadedDocument {
            scheduler: RenderScheduler::new(sizes.clone(), scale, self.pixel_ratio),
            observer: ViewportObserver::new(self.calibration.viewport_margin_ratio),
            zoom: ScaleTransformController::new(scale, self.calibration.zoom_debounce),
            layout: PageLayout::continuous(&sizes, scale, PAGE_GAP),
            search: Arc::new(SearchEngine::new(cache, self.calibration.clone())),
            layers: Arc::new(TextLayerRegistry::new()),
            surfaces: BTreeMap::new(),
            handle,
        });
        self.state.active_page = 1;
        self.state.scale = scale;
        self.scroll_top = 0.0;
        self.scroll_left = 0.0;
        self.refresh_visibility();
        previous
    }

    /// Releases the document and every piece of state derived from it.
    pub fn close(&mut self) -> Option<DocumentHandle> {
        let mut loaded = self.loaded.take()?;
        loaded.scheduler.reset();
        loaded.search.clear();
        loaded.layers.clear_all();
        loaded.zoom.clear();
        self.state.active_page = 1;
        self.scroll_top = 0.0;
        self.scroll_left = 0.0;
        debug!(side = %self.side, "document released");
        Some(loaded.handle)
    }

    fn content_size(&self) -> Option<(f64, f64)> {
        let loaded = self.loaded.as_ref()?;
        match self.state.view_mode {
            ViewMode::Continuous => Some((loaded.layout.max_width(), loaded.layout.total_height())),
            ViewMode::Single => loaded
                .layout
                .slot(self.state.active_page)
                .map(|slot| (slot.width, slot.height + PAGE_GAP * 2.0)),
        }
    }

    fn scroll_range(&self) -> (f64, f64) {
        self.content_size().map_or((0.0, 0.0), |(width, height)| {
            (
                (height - self.viewport.height).max(0.0),
                (width - self.viewport.width).max(0.0),
            )
        })
    }

    /// Recomputes the visible set; pages that left the pre-paint zone lose
    /// their surface and text layer.
    fn refresh_visibility(&mut self) -> Option<VisibilityChange> {
        let loaded = self.loaded.as_mut()?;
        let change = match self.state.view_mode {
            ViewMode::Continuous => loaded.observer.observe(
                &loaded.layout,
                self.scroll_top,
                self.viewport.height,
                &mut loaded.scheduler,
            ),
            ViewMode::Single => {
                let height = loaded
                    .layout
                    .slot(self.state.active_page)
                    .map_or(0.0, |slot| slot.height);
                loaded
                    .observer
                    .observe_single(self.state.active_page, height, &mut loaded.scheduler)
            }
        }?;
        for placeholder in &change.evicted {
            loaded.drop_page(placeholder.page);
        }
        Some(change)
    }

    pub fn set_viewport(&mut self, viewport: ViewportSize) -> Option<VisibilityChange> {
        self.viewport = viewport;
        self.scroll_to(self.scroll_top, self.scroll_left)
    }

    /// Records a scroll of the pane. In continuous mode the active page
    /// follows the top-most visible page.
    pub fn scroll_to(&mut self, scroll_top: f64, scroll_left: f64) -> Option<VisibilityChange> {
        let (max_top, max_left) = self.scroll_range();
        self.scroll_top = scroll_top.clamp(0.0, max_top);
        self.scroll_left = scroll_left.clamp(0.0, max_left);
        if self.state.view_mode == ViewMode::Continuous {
            let top_page = self.layout().and_then(|l| l.page_at(self.scroll_top));
            if let Some(page) = top_page {
                self.state.active_page = page;
            }
        }
        self.refresh_visibility()
    }

    /// Jumps to a page, clamped to the document. Returns whether the active
    /// page changed.
    pub fn goto_page(&mut self, page: usize) -> bool {
        let count = self.page_count();
        if count == 0 {
            return false;
        }
        let page = page.clamp(1, count);
        let changed = page != self.state.active_page;
        match self.state.view_mode {
            ViewMode::Single => {
                self.state.active_page = page;
                self.scroll_top = 0.0;
                self.refresh_visibility();
            }
            ViewMode::Continuous => {
                let top = self
                    .layout()
                    .and_then(|l| l.slot(page))
                    .map_or(0.0, |slot| slot.top);
                self.scroll_to(top, self.scroll_left);
                self.state.active_page = page;
            }
        }
        changed
    }

    pub fn next_page(&mut self, count: usize) -> bool {
        self.goto_page(self.state.active_page.saturating_add(count))
    }

    pub fn prev_page(&mut self, count: usize) -> bool {
        self.goto_page(self.state.active_page.saturating_sub(count).max(1))
    }

    /// Instant zoom: painted surfaces are stretched and the layout resized
    /// now; the real re-render waits for [`poll_zoom`](Self::poll_zoom).
    pub fn set_scale(&mut self, scale: f32, now: Instant) -> Option<ZoomUpdate> {
        let anchor = self.top_anchor();
        let loaded = self.loaded.as_mut()?;
        let mut update = loaded
            .zoom
            .set_scale(scale, now, self.scroll_top, self.scroll_left)?;
        loaded.layout = PageLayout::continuous(loaded.handle.page_sizes(), update.scale, PAGE_GAP);
        self.state.scale = update.scale;
        if let Some(top) = anchor.and_then(|anchor| self.anchor_offset(&anchor)) {
            update.scroll_top = top;
        }
        self.scroll_to(update.scroll_top, update.scroll_left);
        update.scroll_top = self.scroll_top;
        update.scroll_left = self.scroll_left;
        Some(update)
    }

    /// Content point under the viewport's top edge.
    fn top_anchor(&self) -> Option<ScrollAnchor> {
        let layout = self.layout()?;
        match self.state.view_mode {
            ViewMode::Continuous => layout.anchor_at(self.scroll_top),
            ViewMode::Single => {
                let slot = layout.slot(self.state.active_page)?;
                Some(ScrollAnchor::new(
                    slot.page,
                    PAGE_GAP,
                    slot.height,
                    self.scroll_top,
                ))
            }
        }
    }

    fn anchor_offset(&self, anchor: &ScrollAnchor) -> Option<f64> {
        let layout = self.layout()?;
        match self.state.view_mode {
            ViewMode::Continuous => layout.offset_of(anchor),
            ViewMode::Single => {
                let slot = layout.slot(anchor.page)?;
                Some(anchor.offset(PAGE_GAP, slot.height))
            }
        }
    }

    pub fn scale_by(&mut self, factor: f32, now: Instant) -> Option<ZoomUpdate> {
        self.set_scale(self.state.scale * factor, now)
    }

    fn active_page_size(&self) -> Option<PageSize> {
        self.document()?.page_size(self.state.active_page)
    }

    /// Fit computed from this pane's own page geometry.
    pub fn fit_page(&mut self, now: Instant) -> Option<ZoomUpdate> {
        let scale = fit_page_scale(self.viewport, self.active_page_size()?);
        self.set_scale(scale, now)
    }

    pub fn fit_width(&mut self, now: Instant) -> Option<ZoomUpdate> {
        let scale = fit_width_scale(self.viewport, self.active_page_size()?);
        self.set_scale(scale, now)
    }

    /// Hands the settled zoom level to the scheduler once the debounce
    /// window has passed.
    pub fn poll_zoom(&mut self, now: Instant) -> Option<f32> {
        let loaded = self.loaded.as_mut()?;
        let scale = loaded.zoom.poll(now)?;
        loaded.scheduler.set_target_scale(scale);
        debug!(side = %self.side, scale, "zoom settled");
        Some(scale)
    }

    pub fn zoom_deadline(&self) -> Option<Instant> {
        self.loaded.as_ref().and_then(|l| l.zoom.deadline())
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) -> bool {
        if mode == self.state.view_mode {
            return false;
        }
        self.state.view_mode = mode;
        if let Some(loaded) = self.loaded.as_mut() {
            for page in loaded.observer.zone().to_vec() {
                loaded.scheduler.evict(page);
                loaded.drop_page(page);
            }
            loaded.observer.reset();
            loaded.scheduler.set_visible_pages(&[]);
        }
        self.scroll_top = 0.0;
        self.goto_page(self.state.active_page);
        true
    }

    pub fn next_render_job(&mut self, idle: bool) -> Option<RenderJob> {
        self.loaded.as_mut()?.scheduler.next_job(idle)
    }

    /// Applies the outcome of `job`: publishes the text layer and records
    /// the surface. Returns a correcting transform when the page was painted
    /// at a scale that is no longer current.
    pub fn complete_render(
        &mut self,
        job: &RenderJob,
        result: Result<RenderedPage, RenderError>,
    ) -> Option<SurfaceTransform> {
        let loaded = self.loaded.as_mut()?;
        match result {
            Ok(rendered) => {
                let dimensions = (rendered.surface.width, rendered.surface.height);
                if !loaded.scheduler.finish(job, Ok(dimensions)) {
                    return None;
                }
                loaded
                    .layers
                    .publish(rendered.page, Arc::clone(&rendered.text_layer));
                let ratio = f64::from(self.pixel_ratio.max(f32::EPSILON));
                let correction = loaded.zoom.record_rendered(
                    rendered.page,
                    rendered.scale,
                    f64::from(dimensions.0) / ratio,
                    f64::from(dimensions.1) / ratio,
                );
                loaded.surfaces.insert(rendered.page, rendered);
                correction
            }
            Err(err) => {
                loaded.scheduler.finish(job, Err(err));
                None
            }
        }
    }

    /// Runs the next render job, if any, to completion.
    pub async fn render_step(&mut self, idle: bool) -> Option<RenderStep> {
        let job = self.next_render_job(idle)?;
        let document = Arc::clone(self.document()?.engine());
        let result = run_job(document, &job).await;
        let correction = self.complete_render(&job, result);
        Some(RenderStep {
            page: job.page,
            correction,
        })
    }

    pub fn drain_render_events(&mut self) -> Vec<SchedulerEvent> {
        self.loaded
            .as_mut()
            .map(|l| l.scheduler.drain_events())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<ScrollSnapshot> {
        let loaded = self.loaded.as_ref()?;
        let (scroll_width, scroll_height) = self.content_size()?;
        Some(ScrollSnapshot {
            page_count: loaded.handle.page_count,
            mode: self.state.view_mode,
            active_page: self.state.active_page,
            pages: loaded.layout.slots().to_vec(),
            scroll_top: self.scroll_top,
            scroll_left: self.scroll_left,
            client_width: self.viewport.width,
            client_height: self.viewport.height,
            scroll_width,
            scroll_height,
        })
    }

    /// Moves the pane to where the other pane asked it to be.
    pub fn apply_sync(&mut self, command: &SyncCommand) -> Option<VisibilityChange> {
        if self.state.view_mode == ViewMode::Single {
            self.state.active_page = command.page.clamp(1, self.page_count().max(1));
        }
        self.scroll_to(command.scroll_top, command.scroll_left)
    }

    /// Page containers in viewport coordinates, as hit-tested by selections.
    pub fn page_containers(&self) -> Vec<PageContainer> {
        let Some(loaded) = self.loaded.as_ref() else {
            return Vec::new();
        };
        let content_width = loaded.layout.max_width().max(self.viewport.width);
        let place = |page: usize, top: f64, width: f64, height: f64| {
            let left = (content_width - width) / 2.0 - self.scroll_left;
            PageContainer {
                page,
                rect: ClientRect::new(left, top, left + width, top + height),
            }
        };
        match self.state.view_mode {
            ViewMode::Continuous => loaded
                .layout
                .slots()
                .iter()
                .map(|slot| place(slot.page, slot.top - self.scroll_top, slot.width, slot.height))
                .collect(),
            ViewMode::Single => loaded
                .layout
                .slot(self.state.active_page)
                .map(|slot| {
                    place(
                        slot.page,
                        PAGE_GAP - self.scroll_top,
                        slot.width,
                        slot.height,
                    )
                })
                .into_iter()
                .collect(),
        }
    }

    /// Link under a point given in page percent.
    pub fn link_at(&self, page: usize, x: f64, y: f64) -> Option<LinkAction> {
        let document = self.document()?;
        let index = page.checked_sub(1)?;
        let links = match document.engine().links(index) {
            Ok(links) => links,
            Err(err) => {
                warn!(%err, page, "links unavailable");
                return None;
            }
        };
        let (x, y) = ((x / 100.0) as f32, (y / 100.0) as f32);
        links
            .into_iter()
            .find(|link| link.rects.iter().any(|rect| rect.contains(x, y)))
            .map(|link| link.action)
    }
}

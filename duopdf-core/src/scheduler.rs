//! Per-pane render scheduling.
//!
//! The scheduler is a pure state machine: it decides which page to paint next
//! and hands out a [`RenderJob`]; the caller runs the job (see [`run_job`])
//! and reports back through [`RenderScheduler::finish`]. Only one job is in
//! flight at a time, so there is never more than one render per page.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::{MAX_RENDER_PIXELS, PRERENDER_AHEAD, PRERENDER_BEHIND};
use crate::engine::{CancelToken, EngineDocument, PageSize, Surface};
use crate::error::RenderError;
use crate::text_layer::TextLayer;

/// Renders allowed in flight per pane.
pub const MAX_CONCURRENT_RENDERS: usize = 1;

/// Queued pages further than this from every visible page are dropped.
const NEAR_VISIBLE_RADIUS: usize = PRERENDER_AHEAD;

pub(crate) fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

pub(crate) fn same_scale(a: f32, b: f32) -> bool {
    quantize_scale(a) == quantize_scale(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRenderState {
    Unrendered,
    Rendering,
    Rendered,
    Stale,
}

#[derive(Debug, Clone)]
pub struct PageRenderRecord {
    pub state: PageRenderState,
    pub rendered_scale: Option<f32>,
    pub rendered_dimensions: Option<(u32, u32)>,
    /// Scale the painted surface is considered valid for. Differs from
    /// `rendered_scale` when the target moved while the render was in flight
    /// and a transform reconciles the two.
    pub accepted_scale: Option<f32>,
    cancel: Option<CancelToken>,
}

impl Default for PageRenderRecord {
    fn default() -> Self {
        Self {
            state: PageRenderState::Unrendered,
            rendered_scale: None,
            rendered_dimensions: None,
            accepted_scale: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPriority {
    Visible,
    Queued,
    Prerender,
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub ticket: RenderTicket,
    pub page: usize,
    pub scale: f32,
    pub pixel_ratio: f32,
    pub priority: RenderPriority,
    pub dimensions: (u32, u32),
    pub cancel: CancelToken,
}

impl RenderJob {
    pub fn page_index(&self) -> usize {
        self.page.saturating_sub(1)
    }

    /// Scale handed to the engine, accounting for the display's pixel ratio.
    pub fn raster_scale(&self) -> f32 {
        self.scale * self.pixel_ratio
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Rendered {
        page: usize,
        scale: f32,
        dimensions: (u32, u32),
    },
    Canceled {
        page: usize,
    },
    Failed(RenderError),
    /// Surfaced to the user: zoom out to view the page.
    Oversized(RenderError),
}

#[derive(Debug, Clone, Copy)]
struct QueuedRender {
    page: usize,
    scale: f32,
}

pub struct RenderScheduler {
    page_sizes: Vec<PageSize>,
    target_scale: f32,
    pixel_ratio: f32,
    pixel_budget: u64,
    records: HashMap<usize, PageRenderRecord>,
    visible: Vec<usize>,
    queue: VecDeque<QueuedRender>,
    prerender: VecDeque<usize>,
    in_flight: HashMap<usize, RenderJob>,
    failed: HashSet<usize>,
    oversized: HashMap<usize, u32>,
    next_ticket: u64,
    jobs_started: u64,
    events: Vec<SchedulerEvent>,
}

impl RenderScheduler {
    pub fn new(page_sizes: Vec<PageSize>, scale: f32, pixel_ratio: f32) -> Self {
        Self {
            page_sizes,
            target_scale: scale,
            pixel_ratio,
            pixel_budget: MAX_RENDER_PIXELS,
            records: HashMap::new(),
            visible: Vec::new(),
            queue: VecDeque::new(),
            prerender: VecDeque::new(),
            in_flight: HashMap::new(),
            failed: HashSet::new(),
            oversized: HashMap::new(),
            next_ticket: 0,
            jobs_started: 0,
            events: Vec::new(),
        }
    }

    pub fn with_pixel_budget(mut self, budget: u64) -> Self {
        self.pixel_budget = budget;
        self
    }

    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    pub fn target_scale(&self) -> f32 {
        self.target_scale
    }

    pub fn visible_pages(&self) -> &[usize] {
        &self.visible
    }

    pub fn state(&self, page: usize) -> PageRenderState {
        self.records
            .get(&page)
            .map_or(PageRenderState::Unrendered, |r| r.state)
    }

    pub fn record(&self, page: usize) -> Option<&PageRenderRecord> {
        self.records.get(&page)
    }

    pub fn in_flight_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.in_flight.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn queued_pages(&self) -> Vec<usize> {
        self.queue.iter().map(|q| q.page).collect()
    }

    pub fn prerender_pages(&self) -> Vec<usize> {
        self.prerender.iter().copied().collect()
    }

    /// Total number of jobs handed out, for render-count assertions.
    pub fn jobs_started(&self) -> u64 {
        self.jobs_started
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }

    fn in_range(&self, page: usize) -> bool {
        page >= 1 && page <= self.page_sizes.len()
    }

    fn is_current_at(&self, page: usize, scale: f32) -> bool {
        self.records.get(&page).is_some_and(|r| {
            r.state == PageRenderState::Rendered
                && r.accepted_scale.is_some_and(|s| same_scale(s, scale))
        })
    }

    fn needs_render(&self, page: usize, scale: f32) -> bool {
        if self.in_flight.contains_key(&page) || self.failed.contains(&page) {
            return false;
        }
        if self.oversized.get(&page) == Some(&quantize_scale(scale)) {
            return false;
        }
        !self.is_current_at(page, scale)
    }

    fn cancel_in_flight(&mut self, page: usize) -> bool {
        let Some(job) = self.in_flight.remove(&page) else {
            return false;
        };
        job.cancel.cancel();
        let record = self.records.entry(page).or_default();
        record.state = PageRenderState::Unrendered;
        record.cancel = None;
        debug!(page, "canceled in-flight render");
        self.events.push(SchedulerEvent::Canceled { page });
        true
    }

    /// Queues `page` for rendering at `scale`. Returns `false` when the page
    /// is already painted at that scale or out of range.
    #[instrument(skip(self))]
    pub fn request_render(&mut self, page: usize, scale: f32) -> bool {
        if !self.in_range(page) {
            debug!(page, "render requested for page outside document");
            return false;
        }
        if self.is_current_at(page, scale) {
            return false;
        }
        self.cancel_in_flight(page);
        self.failed.remove(&page);
        match self.queue.iter_mut().find(|q| q.page == page) {
            Some(queued) => queued.scale = scale,
            None => self.queue.push_back(QueuedRender { page, scale }),
        }
        true
    }

    /// Replaces the visible set, ordered by visibility. Renders for pages
    /// that just left the set are canceled; pages re-entering it become
    /// eligible again after a failure.
    pub fn set_visible_pages(&mut self, pages: &[usize]) {
        let mut next = Vec::with_capacity(pages.len());
        for &page in pages {
            if self.in_range(page) && !next.contains(&page) {
                next.push(page);
            }
        }
        let previous = std::mem::replace(&mut self.visible, next);
        for page in &previous {
            if !self.visible.contains(page) {
                self.cancel_in_flight(*page);
            }
        }
        for page in &self.visible {
            if !previous.contains(page) {
                self.failed.remove(page);
            }
        }
    }

    /// Moves the target scale. Painted pages become stale; a render already
    /// in flight is left to finish at its own scale.
    pub fn set_target_scale(&mut self, scale: f32) {
        if same_scale(scale, self.target_scale) {
            return;
        }
        self.target_scale = scale;
        for record in self.records.values_mut() {
            if record.state == PageRenderState::Rendered
                && !record.accepted_scale.is_some_and(|s| same_scale(s, scale))
            {
                record.state = PageRenderState::Stale;
            }
        }
    }

    /// Forgets a page entirely: cancels its render, drops it from every
    /// queue and returns the last known dimensions for a placeholder.
    pub fn evict(&mut self, page: usize) -> Option<(u32, u32)> {
        self.cancel_in_flight(page);
        self.queue.retain(|q| q.page != page);
        self.prerender.retain(|&p| p != page);
        self.records
            .remove(&page)
            .and_then(|record| record.rendered_dimensions)
    }

    /// Drops every record and queue entry, e.g. on document swap.
    pub fn reset(&mut self) {
        let pages: Vec<usize> = self.in_flight.keys().copied().collect();
        for page in pages {
            self.cancel_in_flight(page);
        }
        self.records.clear();
        self.queue.clear();
        self.prerender.clear();
        self.failed.clear();
        self.oversized.clear();
        self.visible.clear();
    }

    fn distance_to_visible(&self, page: usize) -> Option<usize> {
        self.visible.iter().map(|&v| v.abs_diff(page)).min()
    }

    fn prune_queues(&mut self) {
        let visible_empty = self.visible.is_empty();
        let mut queue = std::mem::take(&mut self.queue);
        queue.retain(|q| {
            let near = visible_empty
                || self
                    .distance_to_visible(q.page)
                    .is_some_and(|d| d <= NEAR_VISIBLE_RADIUS);
            near && self.needs_render(q.page, q.scale)
        });
        self.queue = queue;

        let target = self.target_scale;
        let mut prerender = std::mem::take(&mut self.prerender);
        prerender.retain(|&page| {
            let near = visible_empty
                || self
                    .distance_to_visible(page)
                    .is_some_and(|d| d <= PRERENDER_AHEAD.max(PRERENDER_BEHIND));
            near && !self.visible.contains(&page) && self.needs_render(page, target)
        });
        self.prerender = prerender;
    }

    fn pop_nearest_queued(&mut self) -> Option<QueuedRender> {
        let index = self
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(i, q)| (self.distance_to_visible(q.page).unwrap_or(0), *i))
            .map(|(i, _)| i)?;
        self.queue.remove(index)
    }

    /// Next job to run, or `None` when the concurrency slot is taken or
    /// nothing needs painting. Prerender work is only handed out when `idle`.
    pub fn next_job(&mut self, idle: bool) -> Option<RenderJob> {
        loop {
            if self.in_flight.len() >= MAX_CONCURRENT_RENDERS {
                return None;
            }
            let target = self.target_scale;
            let visible = self
                .visible
                .iter()
                .copied()
                .find(|&page| self.needs_render(page, target));
            if let Some(page) = visible {
                self.queue.retain(|q| q.page != page);
                if let Some(job) = self.start(page, target, RenderPriority::Visible) {
                    return Some(job);
                }
                continue;
            }

            self.prune_queues();
            if let Some(queued) = self.pop_nearest_queued() {
                if let Some(job) = self.start(queued.page, queued.scale, RenderPriority::Queued) {
                    return Some(job);
                }
                continue;
            }

            if !idle {
                return None;
            }
            let page = self.prerender.pop_front()?;
            if let Some(job) = self.start(page, target, RenderPriority::Prerender) {
                return Some(job);
            }
        }
    }

    fn start(&mut self, page: usize, scale: f32, priority: RenderPriority) -> Option<RenderJob> {
        let size = self.page_sizes.get(page - 1).copied()?;
        let (width, height) = size.viewport(scale).pixel_dimensions(self.pixel_ratio);
        if u64::from(width) * u64::from(height) > self.pixel_budget {
            self.oversized.insert(page, quantize_scale(scale));
            let record = self.records.entry(page).or_default();
            record.state = PageRenderState::Unrendered;
            let err = RenderError::Oversized {
                page,
                width,
                height,
                budget: self.pixel_budget,
            };
            warn!(%err, "refusing oversized render");
            self.events.push(SchedulerEvent::Oversized(err));
            return None;
        }

        self.next_ticket += 1;
        self.jobs_started += 1;
        let cancel = CancelToken::new();
        let job = RenderJob {
            ticket: RenderTicket(self.next_ticket),
            page,
            scale,
            pixel_ratio: self.pixel_ratio,
            priority,
            dimensions: (width, height),
            cancel: cancel.clone(),
        };
        let record = self.records.entry(page).or_default();
        record.state = PageRenderState::Rendering;
        record.cancel = Some(cancel);
        self.in_flight.insert(page, job.clone());
        debug!(page, scale, ?priority, "render started");
        Some(job)
    }

    fn schedule_prerender(&mut self, page: usize) {
        let count = self.page_sizes.len();
        let ahead = (page + 1..=page + PRERENDER_AHEAD).filter(|&p| p <= count);
        let behind = (page.saturating_sub(PRERENDER_BEHIND).max(1)..page).rev();
        let target = self.target_scale;
        for candidate in ahead.chain(behind) {
            if self.visible.contains(&candidate)
                || self.prerender.contains(&candidate)
                || !self.needs_render(candidate, target)
            {
                continue;
            }
            self.prerender.push_back(candidate);
        }
    }

    /// Reports the outcome of `job`. Outcomes of jobs that were canceled or
    /// superseded in the meantime are ignored; returns whether it was applied.
    pub fn finish(&mut self, job: &RenderJob, outcome: Result<(u32, u32), RenderError>) -> bool {
        let current = self
            .in_flight
            .get(&job.page)
            .is_some_and(|running| running.ticket == job.ticket);
        if !current {
            debug!(page = job.page, "ignoring outcome of superseded render");
            return false;
        }
        self.in_flight.remove(&job.page);
        let target = self.target_scale;
        let record = self.records.entry(job.page).or_default();
        record.cancel = None;

        match outcome {
            Ok(dimensions) => {
                record.state = PageRenderState::Rendered;
                record.rendered_scale = Some(job.scale);
                record.rendered_dimensions = Some(dimensions);
                record.accepted_scale = Some(target);
                self.failed.remove(&job.page);
                self.events.push(SchedulerEvent::Rendered {
                    page: job.page,
                    scale: job.scale,
                    dimensions,
                });
                self.schedule_prerender(job.page);
            }
            Err(err) if err.is_cancellation() => {
                record.state = PageRenderState::Unrendered;
                debug!(page = job.page, "render canceled");
                self.events.push(SchedulerEvent::Canceled { page: job.page });
            }
            Err(err @ RenderError::Oversized { .. }) => {
                record.state = PageRenderState::Unrendered;
                self.oversized.insert(job.page, quantize_scale(job.scale));
                self.events.push(SchedulerEvent::Oversized(err));
            }
            Err(err) => {
                record.state = PageRenderState::Unrendered;
                warn!(%err, "page render failed");
                self.failed.insert(job.page);
                self.events.push(SchedulerEvent::Failed(err));
            }
        }
        true
    }
}

/// A painted page together with the text layer built for it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: usize,
    pub scale: f32,
    pub surface: Surface,
    pub text_layer: Arc<TextLayer>,
}

/// Runs `job` against the engine off the interaction path. Painting and the
/// text-layer build are separate phases; cancellation is checked between them.
#[instrument(skip(document, job), fields(page = job.page, scale = job.scale))]
pub async fn run_job(
    document: Arc<dyn EngineDocument>,
    job: &RenderJob,
) -> Result<RenderedPage, RenderError> {
    let page = job.page;
    let index = job.page_index();
    let scale = job.raster_scale();

    job.cancel
        .check()
        .map_err(|err| RenderError::from_engine(page, err))?;
    let engine = Arc::clone(&document);
    let cancel = job.cancel.clone();
    let surface = tokio::task::spawn_blocking(move || engine.render_page(index, scale, &cancel))
        .await
        .map_err(|err| RenderError::Engine {
            page,
            detail: format!("render task failed: {err}"),
        })?
        .map_err(|err| RenderError::from_engine(page, err))?;

    tokio::task::yield_now().await;
    if job.cancel.is_canceled() {
        return Err(RenderError::Canceled { page });
    }

    let engine = Arc::clone(&document);
    let text = tokio::task::spawn_blocking(move || {
        let size = engine.page_size(index)?;
        let fragments = engine.text_content(index)?;
        Ok::<_, crate::error::EngineError>(TextLayer::from_fragments(&fragments, size))
    })
    .await;
    let text_layer = match text {
        Ok(Ok(layer)) => layer,
        Ok(Err(err)) => {
            warn!(%err, page, "text layer unavailable");
            TextLayer::default()
        }
        Err(err) => {
            warn!(%err, page, "text layer task failed");
            TextLayer::default()
        }
    };
    if job.cancel.is_canceled() {
        return Err(RenderError::Canceled { page });
    }

    Ok(RenderedPage {
        page,
        scale: job.scale,
        surface,
        text_layer: Arc::new(text_layer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDocument;

    fn letter_pages(count: usize) -> Vec<PageSize> {
        vec![PageSize::new(612.0, 792.0); count]
    }

    fn ok(job: &RenderJob) -> Result<(u32, u32), RenderError> {
        Ok(job.dimensions)
    }

    #[test]
    fn visible_pages_render_in_visibility_order() {
        let mut scheduler = RenderScheduler::new(letter_pages(10), 1.0, 1.0);
        scheduler.set_visible_pages(&[4, 3, 5]);
        let mut order = Vec::new();
        while let Some(job) = scheduler.next_job(false) {
            assert_eq!(job.priority, RenderPriority::Visible);
            order.push(job.page);
            assert!(scheduler.finish(&job, ok(&job)));
        }
        assert_eq!(order, vec![4, 3, 5]);
        assert_eq!(scheduler.state(3), PageRenderState::Rendered);
    }

    #[test]
    fn concurrency_cap_holds_one_job() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.set_visible_pages(&[1, 2]);
        let first = scheduler.next_job(true).unwrap();
        assert!(scheduler.next_job(true).is_none());
        assert_eq!(scheduler.in_flight_pages(), vec![first.page]);
    }

    #[test]
    fn second_request_cancels_in_flight_render_first() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        assert!(scheduler.request_render(2, 1.0));
        let first = scheduler.next_job(false).unwrap();
        assert_eq!(scheduler.state(2), PageRenderState::Rendering);

        assert!(scheduler.request_render(2, 1.0));
        assert!(first.cancel.is_canceled());
        assert!(scheduler.in_flight_pages().is_empty());

        let second = scheduler.next_job(false).unwrap();
        assert_eq!(second.page, 2);
        assert_ne!(second.ticket, first.ticket);
        assert_eq!(scheduler.in_flight_pages(), vec![2]);

        // The superseded job reporting late changes nothing.
        assert!(!scheduler.finish(&first, Err(RenderError::Canceled { page: 2 })));
        assert_eq!(scheduler.state(2), PageRenderState::Rendering);
        let events = scheduler.drain_events();
        assert_eq!(events, vec![SchedulerEvent::Canceled { page: 2 }]);
    }

    #[test]
    fn duplicate_requests_are_queued_once() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.request_render(3, 1.0);
        scheduler.request_render(3, 1.0);
        assert_eq!(scheduler.queued_pages(), vec![3]);
    }

    #[test]
    fn rendering_same_scale_twice_is_short_circuited() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.5, 1.0);
        scheduler.request_render(1, 1.5);
        let job = scheduler.next_job(false).unwrap();
        scheduler.finish(&job, ok(&job));

        assert!(!scheduler.request_render(1, 1.5));
        assert!(scheduler.next_job(false).is_none());
        assert_eq!(scheduler.jobs_started(), 1);
    }

    #[test]
    fn leaving_visibility_cancels_render() {
        let mut scheduler = RenderScheduler::new(letter_pages(10), 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.set_visible_pages(&[8]);
        assert!(job.cancel.is_canceled());
        assert_eq!(scheduler.state(1), PageRenderState::Unrendered);
        assert_eq!(scheduler.next_job(false).unwrap().page, 8);
    }

    #[test]
    fn visible_outranks_queued_pages() {
        let mut scheduler = RenderScheduler::new(letter_pages(10), 1.0, 1.0);
        scheduler.request_render(6, 1.0);
        scheduler.set_visible_pages(&[5]);
        assert_eq!(scheduler.next_job(false).unwrap().page, 5);
    }

    #[test]
    fn queued_pages_nearest_first_and_far_ones_pruned() {
        let mut scheduler = RenderScheduler::new(letter_pages(20), 1.0, 1.0);
        scheduler.request_render(12, 1.0);
        scheduler.request_render(7, 1.0);
        scheduler.request_render(9, 1.0);
        scheduler.set_visible_pages(&[10]);
        let visible = scheduler.next_job(false).unwrap();
        scheduler.finish(&visible, ok(&visible));

        let first = scheduler.next_job(false).unwrap();
        assert_eq!(first.priority, RenderPriority::Queued);
        assert_eq!(first.page, 9);
        scheduler.finish(&first, ok(&first));
        let far = scheduler.next_job(false).unwrap();
        assert_eq!(far.page, 12);
        scheduler.finish(&far, ok(&far));

        scheduler.set_visible_pages(&[19]);
        let job = scheduler.next_job(false).unwrap();
        assert_eq!(job.page, 19);
        scheduler.finish(&job, ok(&job));
        assert_eq!(scheduler.queued_pages(), vec![7]);
        assert!(scheduler.next_job(false).is_none());
        assert!(scheduler.queued_pages().is_empty());
    }

    #[test]
    fn prerender_neighbours_only_when_idle() {
        let mut scheduler = RenderScheduler::new(letter_pages(10), 1.0, 1.0);
        scheduler.set_visible_pages(&[5]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.finish(&job, ok(&job));
        assert_eq!(scheduler.prerender_pages(), vec![6, 7, 8, 4, 3]);

        assert!(scheduler.next_job(false).is_none());
        let idle = scheduler.next_job(true).unwrap();
        assert_eq!(idle.priority, RenderPriority::Prerender);
        assert_eq!(idle.page, 6);
    }

    #[test]
    fn prerender_respects_document_bounds() {
        let mut scheduler = RenderScheduler::new(letter_pages(3), 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.finish(&job, ok(&job));
        assert_eq!(scheduler.prerender_pages(), vec![2, 3]);
    }

    #[test]
    fn failure_is_retried_only_after_visibility_reentry() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.set_visible_pages(&[2]);
        let job = scheduler.next_job(false).unwrap();
        let err = RenderError::Engine {
            page: 2,
            detail: "bad stream".into(),
        };
        scheduler.finish(&job, Err(err.clone()));
        assert_eq!(scheduler.state(2), PageRenderState::Unrendered);
        assert_eq!(scheduler.drain_events(), vec![SchedulerEvent::Failed(err)]);
        assert!(scheduler.next_job(true).is_none());

        scheduler.set_visible_pages(&[]);
        scheduler.set_visible_pages(&[2]);
        assert_eq!(scheduler.next_job(false).unwrap().page, 2);
    }

    #[test]
    fn oversized_pages_are_refused_until_scale_drops() {
        let mut scheduler = RenderScheduler::new(vec![PageSize::new(5000.0, 5000.0)], 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        assert!(scheduler.next_job(false).is_none());
        let events = scheduler.drain_events();
        assert!(matches!(
            events.as_slice(),
            [SchedulerEvent::Oversized(RenderError::Oversized { page: 1, .. })]
        ));
        assert_eq!(scheduler.state(1), PageRenderState::Unrendered);
        assert!(scheduler.next_job(false).is_none());
        assert!(scheduler.drain_events().is_empty());

        scheduler.set_target_scale(0.5);
        let job = scheduler.next_job(false).unwrap();
        assert_eq!(job.dimensions, (2500, 2500));
    }

    #[test]
    fn scale_change_marks_rendered_pages_stale() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.finish(&job, ok(&job));

        scheduler.set_target_scale(2.0);
        assert_eq!(scheduler.state(1), PageRenderState::Stale);
        let rerender = scheduler.next_job(false).unwrap();
        assert_eq!((rerender.page, rerender.scale), (1, 2.0));
    }

    #[test]
    fn render_in_flight_during_scale_change_is_accepted_without_rerender() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.set_target_scale(1.5);
        assert!(!job.cancel.is_canceled());

        scheduler.finish(&job, ok(&job));
        let record = scheduler.record(1).unwrap();
        assert_eq!(record.state, PageRenderState::Rendered);
        assert_eq!(record.rendered_scale, Some(1.0));
        assert_eq!(record.accepted_scale, Some(1.5));
        assert!(scheduler.next_job(false).is_none());
        assert_eq!(scheduler.jobs_started(), 1);
    }

    #[test]
    fn evict_returns_last_dimensions() {
        let mut scheduler = RenderScheduler::new(letter_pages(5), 1.0, 1.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        scheduler.finish(&job, Ok((612, 792)));
        assert_eq!(scheduler.evict(1), Some((612, 792)));
        assert_eq!(scheduler.state(1), PageRenderState::Unrendered);
    }

    #[test]
    fn pixel_ratio_scales_raster_dimensions() {
        let mut scheduler = RenderScheduler::new(letter_pages(1), 1.0, 2.0);
        scheduler.set_visible_pages(&[1]);
        let job = scheduler.next_job(false).unwrap();
        assert_eq!(job.dimensions, (1224, 1584));
        assert_eq!(job.raster_scale(), 2.0);
    }

    #[tokio::test]
    async fn run_job_paints_and_builds_text_layer() {
        let document = FakeDocument::with_pages(3).into_shared();
        let mut scheduler = RenderScheduler::new(letter_pages(3), 1.0, 1.0);
        scheduler.set_visible_pages(&[2]);
        let job = scheduler.next_job(false).unwrap();

        let rendered = run_job(document, &job).await.unwrap();
        assert_eq!(rendered.page, 2);
        assert_eq!(rendered.text_layer.text(), "Page 2 body text");
        assert!(scheduler.finish(&job, Ok((rendered.surface.width, rendered.surface.height))));
    }

    #[tokio::test]
    async fn engine_failure_leaves_page_unrendered() {
        let fake = Arc::new(FakeDocument::with_pages(2).failing_page(1));
        let document: Arc<dyn EngineDocument> = fake.clone();
        let mut scheduler = RenderScheduler::new(letter_pages(2), 1.0, 1.0);
        scheduler.set_visible_pages(&[2]);
        let job = scheduler.next_job(false).unwrap();

        let err = run_job(document, &job).await.unwrap_err();
        assert!(matches!(err, RenderError::Engine { page: 2, .. }));
        assert!(scheduler.finish(&job, Err(err)));
        assert_eq!(scheduler.state(2), PageRenderState::Unrendered);
        assert_eq!(fake.render_calls(), 1);
    }

    #[tokio::test]
    async fn run_job_reports_cancellation() {
        let document = FakeDocument::with_pages(1).into_shared();
        let mut scheduler = RenderScheduler::new(letter_pages(1), 1.0, 1.0);
        scheduler.request_render(1, 1.0);
        let job = scheduler.next_job(false).unwrap();
        job.cancel.cancel();
        let err = run_job(document, &job).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}

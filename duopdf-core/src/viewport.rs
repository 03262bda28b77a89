//! Continuous-mode page layout and visibility tracking.

use tracing::debug;

use crate::engine::PageSize;
use crate::scheduler::RenderScheduler;

/// Vertical gap between pages in continuous mode, in CSS pixels.
pub const PAGE_GAP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlot {
    pub page: usize,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PageSlot {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn intersects(&self, top: f64, bottom: f64) -> bool {
        self.bottom() > top && self.top < bottom
    }
}

/// Pages stacked in one scrollable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    slots: Vec<PageSlot>,
    total_height: f64,
    max_width: f64,
}

impl PageLayout {
    pub fn continuous(sizes: &[PageSize], scale: f32, gap: f64) -> Self {
        let scale = f64::from(scale);
        let mut top = gap;
        let mut max_width: f64 = 0.0;
        let slots = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let slot = PageSlot {
                    page: index + 1,
                    top,
                    width: f64::from(size.width) * scale,
                    height: f64::from(size.height) * scale,
                };
                top += slot.height + gap;
                max_width = max_width.max(slot.width);
                slot
            })
            .collect();
        Self {
            slots,
            total_height: top,
            max_width,
        }
    }

    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    pub fn slot(&self, page: usize) -> Option<&PageSlot> {
        page.checked_sub(1).and_then(|index| self.slots.get(index))
    }

    pub fn total_height(&self) -> f64 {
        self.total_height
    }

    pub fn max_width(&self) -> f64 {
        self.max_width
    }

    /// Top-most page whose slot reaches below `y`.
    pub fn page_at(&self, y: f64) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.bottom() > y)
            .or_else(|| self.slots.last())
            .map(|slot| slot.page)
    }

    /// The content point at scroll offset `y`.
    pub fn anchor_at(&self, y: f64) -> Option<ScrollAnchor> {
        let slot = self.slot(self.page_at(y)?)?;
        Some(ScrollAnchor::new(slot.page, slot.top, slot.height, y))
    }

    /// Scroll offset of `anchor` in this layout.
    pub fn offset_of(&self, anchor: &ScrollAnchor) -> Option<f64> {
        let slot = self.slot(anchor.page)?;
        Some(anchor.offset(slot.top, slot.height))
    }
}

/// A point of the content, stable across zoom levels: a page and how far
/// down it the point is. Points in the gap above a page keep their pixel
/// distance to it, since gaps do not scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub page: usize,
    pub fraction: f64,
    pub gap: f64,
}

impl ScrollAnchor {
    pub fn new(page: usize, page_top: f64, page_height: f64, y: f64) -> Self {
        if y < page_top || page_height <= 0.0 {
            Self {
                page,
                fraction: 0.0,
                gap: y - page_top,
            }
        } else {
            Self {
                page,
                fraction: (y - page_top) / page_height,
                gap: 0.0,
            }
        }
    }

    pub fn offset(&self, page_top: f64, page_height: f64) -> f64 {
        page_top + self.fraction * page_height + self.gap
    }
}

/// A page that left the pre-paint zone: its surface is freed and a box of the
/// last known height keeps the layout stable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placeholder {
    pub page: usize,
    pub height: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityChange {
    /// Pages in the zone, on-screen pages first.
    pub visible: Vec<usize>,
    pub entered: Vec<usize>,
    pub left: Vec<usize>,
    pub evicted: Vec<Placeholder>,
}

pub struct ViewportObserver {
    margin_ratio: f64,
    zone: Vec<usize>,
}

impl ViewportObserver {
    pub fn new(margin_ratio: f64) -> Self {
        Self {
            margin_ratio,
            zone: Vec::new(),
        }
    }

    pub fn zone(&self) -> &[usize] {
        &self.zone
    }

    pub fn reset(&mut self) {
        self.zone.clear();
    }

    /// Pages intersecting the viewport, then pages within the margin above and
    /// below it, nearest first.
    pub fn pages_in_zone(
        &self,
        layout: &PageLayout,
        scroll_top: f64,
        viewport_height: f64,
    ) -> Vec<usize> {
        let bottom = scroll_top + viewport_height;
        let margin = viewport_height * self.margin_ratio;
        let mut on_screen = Vec::new();
        let mut in_margin = Vec::new();
        for slot in layout.slots() {
            if slot.intersects(scroll_top, bottom) {
                on_screen.push(slot.page);
            } else if slot.intersects(scroll_top - margin, bottom + margin) {
                let distance = if slot.bottom() <= scroll_top {
                    scroll_top - slot.bottom()
                } else {
                    slot.top - bottom
                };
                in_margin.push((distance, slot.page));
            }
        }
        in_margin.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        on_screen.extend(in_margin.into_iter().map(|(_, page)| page));
        on_screen
    }

    /// Recomputes the zone after a scroll or resize. Returns `None` when the
    /// set of pages did not change.
    pub fn observe(
        &mut self,
        layout: &PageLayout,
        scroll_top: f64,
        viewport_height: f64,
        scheduler: &mut RenderScheduler,
    ) -> Option<VisibilityChange> {
        let zone = self.pages_in_zone(layout, scroll_top, viewport_height);
        self.apply(zone, scheduler, |page| {
            layout.slot(page).map_or(0.0, |slot| slot.height)
        })
    }

    /// Single mode: the only visible page is the current one.
    pub fn observe_single(
        &mut self,
        page: usize,
        page_height: f64,
        scheduler: &mut RenderScheduler,
    ) -> Option<VisibilityChange> {
        self.apply(vec![page], scheduler, |_| page_height)
    }

    fn apply(
        &mut self,
        zone: Vec<usize>,
        scheduler: &mut RenderScheduler,
        height_of: impl Fn(usize) -> f64,
    ) -> Option<VisibilityChange> {
        if zone == self.zone {
            return None;
        }
        let entered: Vec<usize> = zone
            .iter()
            .copied()
            .filter(|page| !self.zone.contains(page))
            .collect();
        let left: Vec<usize> = self
            .zone
            .iter()
            .copied()
            .filter(|page| !zone.contains(page))
            .collect();

        scheduler.set_visible_pages(&zone);
        let evicted = left
            .iter()
            .map(|&page| {
                scheduler.evict(page);
                Placeholder {
                    page,
                    height: height_of(page),
                }
            })
            .collect();
        debug!(?entered, ?left, "visible pages changed");
        self.zone = zone.clone();
        Some(VisibilityChange {
            visible: zone,
            entered,
            left,
            evicted,
        })
    }
}

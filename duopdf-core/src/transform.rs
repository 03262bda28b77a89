//! Instant zoom: stretch painted surfaces now, re-render once the scale
//! settles.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::clamp_scale;
use crate::scheduler::same_scale;

/// Linear transform applied to an already painted page surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceTransform {
    pub page: usize,
    pub factor: f32,
    /// Box size after the transform, in CSS pixels.
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoomUpdate {
    pub previous: f32,
    pub scale: f32,
    pub transforms: Vec<SurfaceTransform>,
    /// Scroll offsets keeping the same content point under the top edge.
    /// The controller only scales them; a pane re-anchors them against its
    /// page layout, whose gaps do not scale.
    pub scroll_top: f64,
    pub scroll_left: f64,
}

#[derive(Debug, Clone, Copy)]
struct PaintedSurface {
    scale: f32,
    width: f64,
    height: f64,
}

impl PaintedSurface {
    fn transform_to(&self, page: usize, scale: f32) -> SurfaceTransform {
        let factor = scale / self.scale;
        SurfaceTransform {
            page,
            factor,
            width: self.width * f64::from(factor),
            height: self.height * f64::from(factor),
        }
    }
}

pub struct ScaleTransformController {
    scale: f32,
    debounce: Duration,
    deadline: Option<Instant>,
    painted: BTreeMap<usize, PaintedSurface>,
}

impl ScaleTransformController {
    pub fn new(scale: f32, debounce: Duration) -> Self {
        Self {
            scale: clamp_scale(scale),
            debounce,
            deadline: None,
            painted: BTreeMap::new(),
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Moves to `scale`, stretching every painted surface and restarting the
    /// debounce timer. `None` when the clamped scale is unchanged.
    pub fn set_scale(
        &mut self,
        scale: f32,
        now: Instant,
        scroll_top: f64,
        scroll_left: f64,
    ) -> Option<ZoomUpdate> {
        let scale = clamp_scale(scale);
        if same_scale(scale, self.scale) {
            return None;
        }
        let previous = self.scale;
        self.scale = scale;
        self.deadline = Some(now + self.debounce);
        let ratio = f64::from(scale / previous);
        let transforms = self
            .painted
            .iter()
            .map(|(&page, surface)| surface.transform_to(page, scale))
            .collect();
        Some(ZoomUpdate {
            previous,
            scale,
            transforms,
            scroll_top: scroll_top * ratio,
            scroll_left: scroll_left * ratio,
        })
    }

    /// The settled scale, once, when the debounce timer has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<f32> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(self.scale)
            }
            _ => None,
        }
    }

    /// Records a freshly painted surface. When it was painted at a scale that
    /// is no longer current, the correcting transform is returned instead of
    /// asking for another render.
    pub fn record_rendered(
        &mut self,
        page: usize,
        scale: f32,
        width: f64,
        height: f64,
    ) -> Option<SurfaceTransform> {
        let surface = PaintedSurface {
            scale,
            width,
            height,
        };
        self.painted.insert(page, surface);
        (!same_scale(scale, self.scale)).then(|| surface.transform_to(page, self.scale))
    }

    pub fn forget(&mut self, page: usize) {
        self.painted.remove(&page);
    }

    pub fn clear(&mut self) {
        self.painted.clear();
        self.deadline = None;
    }
}

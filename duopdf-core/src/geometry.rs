//! Client-space and percentage-space rectangles, and line-wise rect merging.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in client pixels, Y down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl ClientRect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn union(&self, other: &ClientRect) -> ClientRect {
        ClientRect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    pub fn vertical_overlap(&self, other: &ClientRect) -> f64 {
        (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0)
    }
}

/// Rectangle expressed in percent (0..=100) of the page width/height,
/// origin top-left. Survives any zoom level unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl PercentRect {
    pub fn from_edges(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Expresses `rect` relative to `container`, clamped to the page.
    pub fn relative_to(rect: &ClientRect, container: &ClientRect) -> Self {
        let width = container.width();
        let height = container.height();
        if width <= 0.0 || height <= 0.0 {
            return Self::from_edges(0.0, 0.0, 0.0, 0.0);
        }
        let pct_x = |x: f64| ((x - container.left) / width * 100.0).clamp(0.0, 100.0);
        let pct_y = |y: f64| ((y - container.top) / height * 100.0).clamp(0.0, 100.0);
        Self::from_edges(
            pct_x(rect.left),
            pct_y(rect.top),
            pct_x(rect.right),
            pct_y(rect.bottom),
        )
    }

    pub fn union(&self, other: &PercentRect) -> PercentRect {
        PercentRect::from_edges(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn union_all<'a, I>(rects: I) -> Option<PercentRect>
    where
        I: IntoIterator<Item = &'a PercentRect>,
    {
        rects
            .into_iter()
            .fold(None, |acc: Option<PercentRect>, rect| match acc {
                Some(bounds) => Some(bounds.union(rect)),
                None => Some(*rect),
            })
    }
}

/// Collapses per-glyph-run selection rectangles into one rectangle per
/// visual line.
///
/// Rects are grouped into lines by vertical overlap (at least half of the
/// shorter rect), sorted left to right, and neighbours on a line are fused
/// when the horizontal gap is below `gap_ratio` times the line height.
pub fn merge_rects(rects: &[ClientRect], gap_ratio: f64) -> Vec<ClientRect> {
    let mut sorted: Vec<ClientRect> = rects.iter().copied().filter(|r| !r.is_empty()).collect();
    sorted.sort_by(|a, b| a.top.total_cmp(&b.top).then(a.left.total_cmp(&b.left)));

    let mut lines: Vec<(ClientRect, Vec<ClientRect>)> = Vec::new();
    for rect in sorted {
        let line = lines.iter_mut().find(|(bounds, _)| {
            let overlap = bounds.vertical_overlap(&rect);
            overlap >= bounds.height().min(rect.height()) * 0.5
        });
        match line {
            Some((bounds, members)) => {
                *bounds = bounds.union(&rect);
                members.push(rect);
            }
            None => lines.push((rect, vec![rect])),
        }
    }

    let mut merged = Vec::new();
    for (bounds, mut members) in lines {
        members.sort_by(|a, b| a.left.total_cmp(&b.left));
        let threshold = bounds.height() * gap_ratio;
        let mut current: Option<ClientRect> = None;
        for rect in members {
            current = match current {
                Some(acc) if rect.left - acc.right < threshold => Some(acc.union(&rect)),
                Some(acc) => {
                    merged.push(acc);
                    Some(rect)
                }
                None => Some(rect),
            };
        }
        if let Some(acc) = current {
            merged.push(acc);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_close_fragments_on_one_line() {
        let a = ClientRect::new(10.0, 100.0, 50.0, 112.0);
        let b = ClientRect::new(55.0, 101.0, 90.0, 112.0);
        let merged = merge_rects(&[b, a], 1.5);
        assert_eq!(merged, vec![ClientRect::new(10.0, 100.0, 90.0, 112.0)]);
    }

    #[test]
    fn keeps_separate_lines_apart() {
        let a = ClientRect::new(10.0, 100.0, 50.0, 112.0);
        let b = ClientRect::new(10.0, 130.0, 50.0, 142.0);
        let merged = merge_rects(&[a, b], 1.5);
        assert_eq!(merged, vec![a, b]);
    }

    #[test]
    fn keeps_distant_columns_on_same_line_apart() {
        let a = ClientRect::new(10.0, 100.0, 50.0, 110.0);
        let b = ClientRect::new(300.0, 100.0, 340.0, 110.0);
        assert_eq!(merge_rects(&[a, b], 1.5).len(), 2);
    }

    #[test]
    fn drops_degenerate_rects() {
        let a = ClientRect::new(10.0, 100.0, 10.0, 110.0);
        assert!(merge_rects(&[a], 1.5).is_empty());
    }

    #[test]
    fn percent_rect_relative_to_container() {
        let container = ClientRect::from_xywh(100.0, 200.0, 400.0, 800.0);
        let rect = ClientRect::new(200.0, 400.0, 300.0, 600.0);
        let pct = PercentRect::relative_to(&rect, &container);
        assert_eq!(pct, PercentRect::from_edges(25.0, 25.0, 50.0, 50.0));
        assert_eq!(pct.width, 25.0);
        assert_eq!(pct.height, 25.0);
    }
}

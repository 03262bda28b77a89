//! Text-selection geometry to page-relative percentage space.

use crate::geometry::{merge_rects, ClientRect, PercentRect};

/// A page container as laid out on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageContainer {
    pub page: usize,
    pub rect: ClientRect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionGeometry {
    pub page: usize,
    /// Single bounding rect of the whole selection.
    pub bounds: PercentRect,
    /// One merged rect per visual line.
    pub rects: Vec<PercentRect>,
    /// Top-left of the bounds, where a comment icon is anchored.
    pub anchor: (f64, f64),
}

pub struct SelectionGeometryMapper {
    merge_gap_ratio: f64,
}

impl SelectionGeometryMapper {
    pub fn new(merge_gap_ratio: f64) -> Self {
        Self { merge_gap_ratio }
    }

    /// Page whose container holds the centre of the first selection rect that
    /// falls inside any container.
    pub fn containing_page<'a>(
        client_rects: &[ClientRect],
        containers: &'a [PageContainer],
    ) -> Option<&'a PageContainer> {
        client_rects
            .iter()
            .filter(|rect| !rect.is_empty())
            .find_map(|rect| {
                let (cx, cy) = rect.center();
                containers.iter().find(|c| c.rect.contains_point(cx, cy))
            })
    }

    /// Maps the selection onto a single page. A selection spanning several
    /// pages is attributed entirely to the first containing page found.
    pub fn map(
        &self,
        client_rects: &[ClientRect],
        containers: &[PageContainer],
    ) -> Option<SelectionGeometry> {
        let container = Self::containing_page(client_rects, containers)?;
        let rects: Vec<PercentRect> = merge_rects(client_rects, self.merge_gap_ratio)
            .iter()
            .map(|rect| PercentRect::relative_to(rect, &container.rect))
            .filter(|rect| rect.width > 0.0 && rect.height > 0.0)
            .collect();
        let bounds = PercentRect::union_all(&rects)?;
        Some(SelectionGeometry {
            page: container.page,
            bounds,
            anchor: (bounds.left, bounds.top),
            rects,
        })
    }
}

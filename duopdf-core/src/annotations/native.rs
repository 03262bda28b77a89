//! Mapping between percentage-space annotations and native PDF annotation
//! objects.
//!
//! Native objects live in PDF user space: points, origin bottom-left, Y up.
//! Everything in the store is percent of page width/height with the origin
//! top-left, so every conversion flips Y.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::geometry::PercentRect;

/// Edge length in points of the icon rect written for a point comment.
pub const COMMENT_ICON_SIZE: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeKind {
    Text,
    Highlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PdfRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn union(&self, other: &PdfRect) -> PdfRect {
        PdfRect::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAnnotation {
    pub kind: NativeKind,
    pub rect: PdfRect,
    /// Eight numbers per quad: upper-left, upper-right, lower-left, lower-right.
    pub quad_points: Vec<f64>,
    pub contents: String,
    pub author: Option<String>,
    /// Raw PDF date string (`D:YYYYMMDDHHmmSS+HH'mm'`).
    pub modified: Option<String>,
    /// Identity of the annotation within its document: the `/NM` entry, or
    /// a key the persistence library derives when the object has none.
    /// Written back as `/NM` when set.
    #[serde(default)]
    pub name: Option<String>,
}

/// One page as seen by the persistence library: its size in points (origin
/// already normalized to zero) and the comment-bearing annotations on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativePage {
    pub width: f64,
    pub height: f64,
    pub annotations: Vec<NativeAnnotation>,
}

/// Annotations to be written onto the page at `page_index` (0-based).
#[derive(Debug, Clone, PartialEq)]
pub struct PageAnnotations {
    pub page_index: usize,
    pub annotations: Vec<NativeAnnotation>,
    /// Names of the annotations already on the page that the store owns.
    pub replaces: Vec<String>,
}

/// The annotation persistence library.
///
/// `write` removes the Text and Highlight annotations named in each page's
/// `replaces` list, together with their popups, and appends the given ones.
/// Anything the store never imported or created stays in the document.
pub trait AnnotationPersistence: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<Vec<NativePage>, PersistError>;
    fn write(&self, bytes: &[u8], pages: &[PageAnnotations]) -> Result<Vec<u8>, PersistError>;
}

fn to_points_x(percent: f64, width: f64) -> f64 {
    percent / 100.0 * width
}

fn to_points_y(percent: f64, height: f64) -> f64 {
    height - percent / 100.0 * height
}

fn to_percent_x(points: f64, width: f64) -> f64 {
    if width > 0.0 {
        points / width * 100.0
    } else {
        0.0
    }
}

fn to_percent_y(points: f64, height: f64) -> f64 {
    if height > 0.0 {
        (height - points) / height * 100.0
    } else {
        0.0
    }
}

/// Icon rect of a point comment whose top-left corner sits at (`x`%, `y`%).
pub fn comment_rect(x: f64, y: f64, width: f64, height: f64) -> PdfRect {
    let left = to_points_x(x, width);
    let top = to_points_y(y, height);
    PdfRect::new(left, top - COMMENT_ICON_SIZE, left + COMMENT_ICON_SIZE, top)
}

/// Top-left corner of a comment icon rect, in percent.
pub fn comment_position(rect: &PdfRect, width: f64, height: f64) -> (f64, f64) {
    (to_percent_x(rect.x1, width), to_percent_y(rect.y2, height))
}

/// One quad per line rect, and the union of all of them as the bounding rect.
pub fn highlight_quads(
    rects: &[PercentRect],
    width: f64,
    height: f64,
) -> Option<(PdfRect, Vec<f64>)> {
    let mut quads = Vec::with_capacity(rects.len() * 8);
    let mut bounds: Option<PdfRect> = None;
    for rect in rects {
        let x1 = to_points_x(rect.left, width);
        let x2 = to_points_x(rect.right, width);
        let top = to_points_y(rect.top, height);
        let bottom = to_points_y(rect.bottom, height);
        quads.extend_from_slice(&[x1, top, x2, top, x1, bottom, x2, bottom]);
        let line = PdfRect::new(x1, bottom, x2, top);
        bounds = Some(match bounds {
            Some(acc) => acc.union(&line),
            None => line,
        });
    }
    bounds.map(|bounds| (bounds, quads))
}

/// Line rects recovered from quad points; falls back to the annotation rect
/// when the quads are missing or truncated.
pub fn highlight_rects(native: &NativeAnnotation, width: f64, height: f64) -> Vec<PercentRect> {
    let to_percent = |rect: PdfRect| {
        PercentRect::from_edges(
            to_percent_x(rect.x1, width),
            to_percent_y(rect.y2, height),
            to_percent_x(rect.x2, width),
            to_percent_y(rect.y1, height),
        )
    };
    let rects: Vec<PercentRect> = native
        .quad_points
        .chunks_exact(8)
        .map(|quad| {
            let xs = [quad[0], quad[2], quad[4], quad[6]];
            let ys = [quad[1], quad[3], quad[5], quad[7]];
            let min = |v: [f64; 4]| v.into_iter().fold(f64::INFINITY, f64::min);
            let max = |v: [f64; 4]| v.into_iter().fold(f64::NEG_INFINITY, f64::max);
            to_percent(PdfRect::new(min(xs), min(ys), max(xs), max(ys)))
        })
        .collect();
    if rects.is_empty() {
        vec![to_percent(native.rect)]
    } else {
        rects
    }
}

pub fn iso_timestamp(moment: DateTime<Utc>) -> String {
    moment.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn zone_offset_seconds(zone: &str) -> Option<i32> {
    let zone: String = zone.chars().filter(|c| *c != '\'').collect();
    let mut chars = zone.chars();
    match chars.next() {
        None | Some('Z') | Some('z') => Some(0),
        Some(sign @ ('+' | '-')) => {
            let rest: String = chars.collect();
            let hours: i32 = rest.get(0..2).and_then(|s| s.parse().ok()).unwrap_or(0);
            let minutes: i32 = rest.get(2..4).and_then(|s| s.parse().ok()).unwrap_or(0);
            let total = hours * 3600 + minutes * 60;
            Some(if sign == '-' { -total } else { total })
        }
        Some(_) => None,
    }
}

/// Parses `D:YYYYMMDDHHmmSS` followed by `Z` or `±HH'mm'`. Everything after
/// the year is optional; missing fields take their lowest value.
pub fn parse_pdf_date(raw: &str) -> Option<DateTime<Utc>> {
    let body = raw.trim();
    let body = body.strip_prefix("D:").unwrap_or(body);
    let digit_count = body.chars().take_while(char::is_ascii_digit).count();
    if digit_count < 4 {
        return None;
    }
    let (digits, zone) = body.split_at(digit_count);
    let field = |start: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(value) => value.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 1)?, field(6, 1)?)?;
    let naive = date.and_hms_opt(field(8, 0)?, field(10, 0)?, field(12, 0)?)?;
    let offset = FixedOffset::east_opt(zone_offset_seconds(zone)?)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|moment| moment.with_timezone(&Utc))
}

/// ISO-8601 timestamp for an imported date; malformed or missing dates
/// become `now` instead of failing the import.
pub fn import_timestamp(raw: Option<&str>, now: DateTime<Utc>) -> String {
    iso_timestamp(raw.and_then(parse_pdf_date).unwrap_or(now))
}

/// PDF date string for an ISO-8601 timestamp, always written in UTC.
pub fn format_pdf_date(iso: &str, now: DateTime<Utc>) -> String {
    let moment = DateTime::parse_from_rfc3339(iso)
        .map(|moment| moment.with_timezone(&Utc))
        .unwrap_or(now);
    moment.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

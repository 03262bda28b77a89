//! Mirroring the reading position of one pane onto the other.
//!
//! Positions are exchanged as a global scroll position, `(page - 1) +
//! fraction`, never as pixels, so documents with different page sizes and
//! counts line up by content.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::pane::{Side, ViewMode};
use crate::viewport::PageSlot;

/// Everything the engine needs to know about one pane's scroll state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollSnapshot {
    pub page_count: usize,
    pub mode: ViewMode,
    pub active_page: usize,
    /// Continuous-mode layout; ignored in single mode.
    pub pages: Vec<PageSlot>,
    pub scroll_top: f64,
    pub scroll_left: f64,
    pub client_width: f64,
    pub client_height: f64,
    pub scroll_width: f64,
    pub scroll_height: f64,
}

/// Where to scroll a pane so it shows a given global position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTarget {
    pub page: usize,
    pub fraction: f64,
    pub scroll_top: f64,
    pub scroll_left: f64,
}

impl ScrollSnapshot {
    fn vertical_range(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    fn horizontal_range(&self) -> f64 {
        (self.scroll_width - self.client_width).max(0.0)
    }

    /// `(page - 1) + fraction` of the top-most visible page.
    pub fn global_position(&self) -> f64 {
        if self.page_count == 0 {
            return 0.0;
        }
        match self.mode {
            ViewMode::Single => {
                let range = self.vertical_range();
                let fraction = if range > 0.0 {
                    (self.scroll_top / range).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (self.active_page.clamp(1, self.page_count) - 1) as f64 + fraction
            }
            ViewMode::Continuous => {
                let Some(slot) = self
                    .pages
                    .iter()
                    .find(|slot| slot.bottom() > self.scroll_top)
                    .or_else(|| self.pages.last())
                else {
                    return 0.0;
                };
                let fraction = if slot.height > 0.0 {
                    ((self.scroll_top - slot.top) / slot.height).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (slot.page - 1) as f64 + fraction
            }
        }
    }

    /// Horizontal scroll as a fraction of the scrollable width.
    pub fn horizontal_fraction(&self) -> f64 {
        let range = self.horizontal_range();
        if range > 0.0 {
            (self.scroll_left / range).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Inverse of [`global_position`](Self::global_position).
    pub fn target_for(&self, position: f64, horizontal: f64) -> ScrollTarget {
        let count = self.page_count.max(1);
        let position = position.clamp(0.0, count as f64);
        let page = ((position.floor() as usize) + 1).min(count);
        let fraction = (position - (page - 1) as f64).clamp(0.0, 1.0);
        let scroll_top = match self.mode {
            ViewMode::Single => fraction * self.vertical_range(),
            ViewMode::Continuous => self
                .pages
                .get(page - 1)
                .map_or(0.0, |slot| slot.top + fraction * slot.height),
        };
        ScrollTarget {
            page,
            fraction,
            scroll_top,
            scroll_left: horizontal.clamp(0.0, 1.0) * self.horizontal_range(),
        }
    }
}

/// Loop-prevention state of one pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLock {
    Idle,
    /// A sync write was issued; the scroll event it causes is an echo.
    WriteInFlight { since: Instant },
}

impl SyncLock {
    fn is_held(&self, now: Instant, timeout: Duration) -> bool {
        match self {
            SyncLock::Idle => false,
            SyncLock::WriteInFlight { since } => now.saturating_duration_since(*since) < timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Disabled,
    /// The event was caused by our own write and has been consumed.
    Echo,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCommand {
    pub target: Side,
    pub position: f64,
    pub horizontal: f64,
    pub page: usize,
    pub fraction: f64,
    pub scroll_top: f64,
    pub scroll_left: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingSync {
    source: Side,
    position: f64,
    horizontal: f64,
}

pub struct ScrollSyncEngine {
    enabled: bool,
    offset: f64,
    left_lock: SyncLock,
    right_lock: SyncLock,
    pending: Option<PendingSync>,
    lock_timeout: Duration,
    tolerance: f64,
}

impl ScrollSyncEngine {
    pub fn new(lock_timeout: Duration, tolerance: f64) -> Self {
        Self {
            enabled: false,
            offset: 0.0,
            left_lock: SyncLock::Idle,
            right_lock: SyncLock::Idle,
            pending: None,
            lock_timeout,
            tolerance,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Right-minus-left offset applied to every mirrored position.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn lock(&self, side: Side) -> SyncLock {
        match side {
            Side::Left => self.left_lock,
            Side::Right => self.right_lock,
        }
    }

    fn lock_mut(&mut self, side: Side) -> &mut SyncLock {
        match side {
            Side::Left => &mut self.left_lock,
            Side::Right => &mut self.right_lock,
        }
    }

    /// Turns sync on. With `capture_offset`, the current distance between the
    /// two panes is preserved instead of snapping them together.
    pub fn enable(&mut self, left: &ScrollSnapshot, right: &ScrollSnapshot, capture_offset: bool) {
        self.offset = if capture_offset {
            right.global_position() - left.global_position()
        } else {
            0.0
        };
        self.enabled = true;
        self.pending = None;
        debug!(offset = self.offset, "scroll sync enabled");
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.pending = None;
        self.left_lock = SyncLock::Idle;
        self.right_lock = SyncLock::Idle;
    }

    /// Records a scroll of `side`. Only the latest position per frame is kept.
    pub fn on_scroll(&mut self, side: Side, snapshot: &ScrollSnapshot, now: Instant) -> ScrollOutcome {
        if !self.enabled {
            return ScrollOutcome::Disabled;
        }
        let timeout = self.lock_timeout;
        let lock = self.lock_mut(side);
        let held = lock.is_held(now, timeout);
        let was_locked = *lock != SyncLock::Idle;
        *lock = SyncLock::Idle;
        if held {
            return ScrollOutcome::Echo;
        }
        if was_locked {
            debug!(%side, "sync lock expired without echo");
        }
        self.pending = Some(PendingSync {
            source: side,
            position: snapshot.global_position(),
            horizontal: snapshot.horizontal_fraction(),
        });
        ScrollOutcome::Pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Animation-frame tick: turns the pending record into a write on the
    /// opposite pane, unless it is already within tolerance.
    pub fn on_frame(
        &mut self,
        now: Instant,
        snapshot_of: impl Fn(Side) -> Option<ScrollSnapshot>,
    ) -> Option<SyncCommand> {
        let pending = self.pending.take()?;
        if !self.enabled {
            return None;
        }
        let target_side = pending.source.other();
        let target = snapshot_of(target_side)?;

        let shifted = match pending.source {
            Side::Left => pending.position + self.offset,
            Side::Right => pending.position - self.offset,
        };
        let position = shifted.clamp(0.0, target.page_count as f64);

        let vertical_close = (target.global_position() - position).abs() <= self.tolerance;
        let horizontal_close =
            (target.horizontal_fraction() - pending.horizontal).abs() <= self.tolerance;
        if vertical_close && horizontal_close {
            return None;
        }

        let scroll = target.target_for(position, pending.horizontal);
        *self.lock_mut(target_side) = SyncLock::WriteInFlight { since: now };
        Some(SyncCommand {
            target: target_side,
            position,
            horizontal: pending.horizontal,
            page: scroll.page,
            fraction: scroll.fraction,
            scroll_top: scroll.scroll_top,
            scroll_left: scroll.scroll_left,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PageSize;
    use crate::viewport::{PageLayout, PAGE_GAP};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn continuous(pages: usize, width: f32, height: f32) -> ScrollSnapshot {
        let sizes = vec![PageSize::new(width, height); pages];
        let layout = PageLayout::continuous(&sizes, 1.0, PAGE_GAP);
        ScrollSnapshot {
            page_count: pages,
            mode: ViewMode::Continuous,
            active_page: 1,
            pages: layout.slots().to_vec(),
            scroll_top: 0.0,
            scroll_left: 0.0,
            client_width: 500.0,
            client_height: 700.0,
            scroll_width: layout.max_width(),
            scroll_height: layout.total_height(),
        }
    }

    fn scrolled_to(mut snapshot: ScrollSnapshot, position: f64) -> ScrollSnapshot {
        let target = snapshot.target_for(position, 0.0);
        snapshot.scroll_top = target.scroll_top;
        snapshot.active_page = target.page;
        snapshot
    }

    fn apply(mut snapshot: ScrollSnapshot, command: &SyncCommand) -> ScrollSnapshot {
        snapshot.scroll_top = command.scroll_top;
        snapshot.scroll_left = command.scroll_left;
        snapshot.active_page = command.page;
        snapshot
    }

    #[test]
    fn global_position_counts_pages_and_fraction() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 4.4);
        assert!((left.global_position() - 4.4).abs() < 1e-9);
    }

    #[test]
    fn left_page_five_at_forty_percent_maps_to_same_spot_on_right() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 4.4);
        let right = continuous(20, 842.0, 595.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&continuous(10, 612.0, 792.0), &right, false);

        let now = Instant::now();
        assert_eq!(sync.on_scroll(Side::Left, &left, now), ScrollOutcome::Pending);
        let command = sync
            .on_frame(now, |side| (side == Side::Right).then(|| right.clone()))
            .unwrap();
        assert_eq!(command.target, Side::Right);
        assert_eq!(command.page, 5);
        assert!((command.fraction - 0.4).abs() < 1e-9);

        let synced = apply(right, &command);
        assert!((synced.global_position() - 4.4).abs() <= 0.005);
    }

    #[test]
    fn echo_of_sync_write_is_not_mirrored_back() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 2.5);
        let right = continuous(10, 612.0, 792.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&left, &right, false);

        let now = Instant::now();
        sync.on_scroll(Side::Left, &left, now);
        let command = sync.on_frame(now, |_| Some(right.clone())).unwrap();
        assert!(matches!(sync.lock(Side::Right), SyncLock::WriteInFlight { .. }));

        let synced = apply(right, &command);
        let echo_at = now + Duration::from_millis(16);
        assert_eq!(sync.on_scroll(Side::Right, &synced, echo_at), ScrollOutcome::Echo);
        assert_eq!(sync.lock(Side::Right), SyncLock::Idle);
        assert!(sync.on_frame(echo_at, |_| Some(left.clone())).is_none());
    }

    #[test]
    fn lock_expires_when_echo_never_arrives() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 1.0);
        let right = continuous(10, 612.0, 792.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&left, &right, false);
        let now = Instant::now();
        sync.on_scroll(Side::Left, &left, now);
        sync.on_frame(now, |_| Some(right.clone())).unwrap();

        let user_scroll = scrolled_to(right.clone(), 6.0);
        let later = now + Duration::from_millis(150);
        assert_eq!(
            sync.on_scroll(Side::Right, &user_scroll, later),
            ScrollOutcome::Pending
        );
        let back = sync.on_frame(later, |_| Some(left.clone())).unwrap();
        assert_eq!(back.target, Side::Left);
        assert_eq!(back.page, 7);
    }

    #[test]
    fn only_latest_scroll_per_frame_is_synced() {
        let base = continuous(10, 612.0, 792.0);
        let right = continuous(10, 612.0, 792.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&base, &right, false);
        let now = Instant::now();
        for position in [1.0, 2.0, 3.25] {
            sync.on_scroll(Side::Left, &scrolled_to(base.clone(), position), now);
        }
        let command = sync.on_frame(now, |_| Some(right.clone())).unwrap();
        assert!((command.position - 3.25).abs() < 1e-9);
        assert!(sync.on_frame(now, |_| Some(right.clone())).is_none());
    }

    #[test]
    fn captured_offset_is_applied_and_clamped() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 1.0);
        let right = scrolled_to(continuous(4, 612.0, 792.0), 3.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&left, &right, true);
        assert!((sync.offset() - 2.0).abs() < 1e-9);

        let now = Instant::now();
        let moved = scrolled_to(left.clone(), 1.5);
        sync.on_scroll(Side::Left, &moved, now);
        let command = sync.on_frame(now, |_| Some(right.clone())).unwrap();
        assert!((command.position - 3.5).abs() < 1e-9);

        let far = scrolled_to(left, 8.0);
        sync.on_scroll(Side::Left, &far, now);
        let command = sync.on_frame(now, |_| Some(right.clone())).unwrap();
        assert_eq!(command.position, 4.0);
        assert_eq!(command.page, 4);
        assert_eq!(command.fraction, 1.0);
    }

    #[test]
    fn redundant_write_is_skipped() {
        let left = scrolled_to(continuous(10, 612.0, 792.0), 3.0);
        let right = scrolled_to(continuous(10, 612.0, 792.0), 3.002);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&left, &right, false);
        let now = Instant::now();
        sync.on_scroll(Side::Left, &left, now);
        assert!(sync.on_frame(now, |_| Some(right.clone())).is_none());
        assert_eq!(sync.lock(Side::Right), SyncLock::Idle);
    }

    #[test]
    fn horizontal_scroll_is_mirrored_as_fraction() {
        let mut left = continuous(2, 1000.0, 792.0);
        left.scroll_left = 250.0;
        let right = continuous(2, 1500.0, 792.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        sync.enable(&continuous(2, 1000.0, 792.0), &right, false);
        let now = Instant::now();
        sync.on_scroll(Side::Left, &left, now);
        let command = sync.on_frame(now, |_| Some(right.clone())).unwrap();
        assert!((command.horizontal - 0.5).abs() < 1e-9);
        assert!((command.scroll_left - 500.0).abs() < 1e-9);
    }

    #[test]
    fn single_mode_position_uses_page_scroll() {
        let snapshot = ScrollSnapshot {
            page_count: 8,
            mode: ViewMode::Single,
            active_page: 3,
            pages: Vec::new(),
            scroll_top: 150.0,
            scroll_left: 0.0,
            client_width: 600.0,
            client_height: 500.0,
            scroll_width: 600.0,
            scroll_height: 800.0,
        };
        assert!((snapshot.global_position() - 2.5).abs() < 1e-9);
        let target = snapshot.target_for(5.25, 0.0);
        assert_eq!(target.page, 6);
        assert!((target.scroll_top - 75.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_sync_ignores_scrolls() {
        let snapshot = continuous(3, 612.0, 792.0);
        let mut sync = ScrollSyncEngine::new(TIMEOUT, 0.005);
        assert_eq!(
            sync.on_scroll(Side::Left, &snapshot, Instant::now()),
            ScrollOutcome::Disabled
        );
        assert!(!sync.has_pending());
    }
}

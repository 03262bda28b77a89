//! The two panes side by side, the annotation map they share and the
//! commands that drive them.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::annotations::native::{iso_timestamp, AnnotationPersistence};
use crate::annotations::{Annotation, AnnotationStore, CommentDraft};
use crate::config::Settings;
use crate::document::{DocumentHandle, DocumentId};
use crate::engine::{DocumentEngine, LinkAction};
use crate::error::{ExportError, RenderError};
use crate::geometry::ClientRect;
use crate::pane::{Pane, RenderStep, Side, ViewMode, ViewportSize};
use crate::scheduler::SchedulerEvent;
use crate::search::{Highlight, SearchOutcome, SearchResult};
use crate::selection::SelectionGeometryMapper;
use crate::store::{AnnotationBackup, BackupStore};
use crate::sync::{ScrollOutcome, ScrollSyncEngine, SyncCommand};
use crate::transform::{SurfaceTransform, ZoomUpdate};
use crate::viewport::Placeholder;

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { side: Side, count: usize },
    PrevPage { side: Side, count: usize },
    GotoPage { side: Side, page: usize },
    ScaleBy { side: Side, factor: f32 },
    SetScale { side: Side, scale: f32 },
    FitPage { side: Side },
    FitWidth { side: Side },
    SetViewMode { side: Side, mode: ViewMode },
    ToggleSync { capture_offset: bool },
    ClosePane { side: Side },
    GotoOutline { side: Side, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEvent {
    DocumentOpened {
        side: Side,
        id: DocumentId,
        imported: usize,
    },
    DocumentClosed {
        side: Side,
        id: DocumentId,
        removed_annotations: usize,
    },
    LoadFailed {
        side: Side,
        message: String,
    },
    /// A backup exists for the document just opened; restoring it needs the
    /// user's confirmation.
    BackupAvailable {
        side: Side,
        id: DocumentId,
        count: usize,
    },
    PageChanged {
        side: Side,
        page: usize,
    },
    Zoomed {
        side: Side,
        update: ZoomUpdate,
    },
    ZoomSettled {
        side: Side,
        scale: f32,
    },
    ViewModeChanged {
        side: Side,
        mode: ViewMode,
    },
    PagesEvicted {
        side: Side,
        placeholders: Vec<Placeholder>,
    },
    SyncToggled {
        enabled: bool,
    },
    Synced(SyncCommand),
    PageRendered {
        side: Side,
        page: usize,
        scale: f32,
    },
    SurfaceCorrected {
        side: Side,
        transform: SurfaceTransform,
    },
    RenderFailed {
        side: Side,
        error: RenderError,
    },
    /// The page is too large at this zoom level; the user should zoom out.
    PageTooLarge {
        side: Side,
        message: String,
    },
    AnnotationsChanged {
        side: Side,
    },
    Exported {
        side: Side,
        file_name: String,
    },
    ExportFailed {
        side: Side,
        message: String,
    },
    OpenUri {
        uri: String,
    },
}

/// Bytes of a document with its annotations embedded.
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub file_name: String,
    pub bytes: Bytes,
}

pub struct Workspace {
    settings: Settings,
    left: Pane,
    right: Pane,
    sync: ScrollSyncEngine,
    annotations: AnnotationStore,
    selection: SelectionGeometryMapper,
    persistence: Arc<dyn AnnotationPersistence>,
    backups: Arc<dyn BackupStore>,
    events: Arc<Mutex<Vec<WorkspaceEvent>>>,
}

impl Workspace {
    pub fn new(
        settings: Settings,
        persistence: Arc<dyn AnnotationPersistence>,
        backups: Arc<dyn BackupStore>,
    ) -> Self {
        let calibration = settings.calibration.clone();
        let pane = |side| {
            Pane::new(
                side,
                settings.view_mode,
                settings.pixel_ratio,
                calibration.clone(),
            )
        };
        Self {
            left: pane(Side::Left),
            right: pane(Side::Right),
            sync: ScrollSyncEngine::new(calibration.sync_lock_timeout, calibration.sync_tolerance),
            annotations: AnnotationStore::new(),
            selection: SelectionGeometryMapper::new(calibration.merge_gap_ratio),
            persistence,
            backups,
            events: Arc::new(Mutex::new(Vec::new())),
            settings,
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<WorkspaceEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<WorkspaceEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn emit(&self, event: WorkspaceEvent) {
        self.events.lock().push(event);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pane(&self, side: Side) -> &Pane {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn pane_mut(&mut self, side: Side) -> &mut Pane {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn sync(&self) -> &ScrollSyncEngine {
        &self.sync
    }

    /// Loads `bytes` into `side`, replacing whatever was there. A failure
    /// leaves the other pane untouched.
    #[instrument(skip(self, engine, bytes, source))]
    pub async fn open_with<E: DocumentEngine + ?Sized>(
        &mut self,
        engine: &E,
        side: Side,
        bytes: Bytes,
        display_name: &str,
        source: Option<String>,
    ) -> Result<DocumentId> {
        let handle = match DocumentHandle::load(engine, bytes, display_name, source).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, %side, "document load failed");
                self.emit(WorkspaceEvent::LoadFailed {
                    side,
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };
        self.close_pane(side);

        let id = handle.id;
        let imported = match self.persistence.read(&handle.raw_bytes) {
            Ok(pages) => self.annotations.import(side, &pages, Utc::now()),
            Err(err) => {
                warn!(%err, %side, "cannot read existing annotations");
                0
            }
        };
        match self.backups.load(id) {
            Ok(Some(backup)) if !backup.annotations.is_empty() => {
                self.emit(WorkspaceEvent::BackupAvailable {
                    side,
                    id,
                    count: backup.annotations.len(),
                });
            }
            Ok(_) => {}
            Err(err) => warn!(?err, %side, "cannot read annotation backup"),
        }

        let zoom = self.settings.zoom;
        self.pane_mut(side).load(handle, zoom);
        info!(%side, %id, imported, "document opened");
        self.emit(WorkspaceEvent::DocumentOpened { side, id, imported });
        Ok(id)
    }

    /// Closes a pane. Its annotations go with it, and sync stops since it
    /// needs both panes.
    pub fn close_pane(&mut self, side: Side) -> bool {
        let Some(handle) = self.pane_mut(side).close() else {
            return false;
        };
        let removed = self.annotations.remove_side(side);
        if self.sync.is_enabled() {
            self.sync.disable();
            self.emit(WorkspaceEvent::SyncToggled { enabled: false });
        }
        self.emit(WorkspaceEvent::DocumentClosed {
            side,
            id: handle.id,
            removed_annotations: removed,
        });
        true
    }

    pub fn apply(&mut self, command: Command, now: Instant) -> Result<()> {
        match command {
            Command::NextPage { side, count } => {
                let changed = self.pane_mut(side).next_page(count);
                self.after_navigation(side, changed, now);
            }
            Command::PrevPage { side, count } => {
                let changed = self.pane_mut(side).prev_page(count);
                self.after_navigation(side, changed, now);
            }
            Command::GotoPage { side, page } => {
                let changed = self.pane_mut(side).goto_page(page);
                self.after_navigation(side, changed, now);
            }
            Command::ScaleBy { side, factor } => {
                let update = self.pane_mut(side).scale_by(factor, now);
                self.after_zoom(side, update, now);
            }
            Command::SetScale { side, scale } => {
                let update = self.pane_mut(side).set_scale(scale, now);
                self.after_zoom(side, update, now);
            }
            Command::FitPage { side } => {
                for target in self.fit_targets(side) {
                    let update = self.pane_mut(target).fit_page(now);
                    self.after_zoom(target, update, now);
                }
            }
            Command::FitWidth { side } => {
                for target in self.fit_targets(side) {
                    let update = self.pane_mut(target).fit_width(now);
                    self.after_zoom(target, update, now);
                }
            }
            Command::SetViewMode { side, mode } => {
                if self.pane_mut(side).set_view_mode(mode) {
                    self.emit(WorkspaceEvent::ViewModeChanged { side, mode });
                }
            }
            Command::ToggleSync { capture_offset } => {
                if self.sync.is_enabled() {
                    self.sync.disable();
                } else {
                    let (Some(left), Some(right)) = (self.left.snapshot(), self.right.snapshot())
                    else {
                        bail!("scroll sync needs a document in both panes");
                    };
                    self.sync.enable(&left, &right, capture_offset);
                }
                self.emit(WorkspaceEvent::SyncToggled {
                    enabled: self.sync.is_enabled(),
                });
            }
            Command::ClosePane { side } => {
                self.close_pane(side);
            }
            Command::GotoOutline { side, index } => self.goto_outline(side, index, now)?,
        }
        Ok(())
    }

    pub fn goto_outline(&mut self, side: Side, index: usize, now: Instant) -> Result<()> {
        let page_index = self
            .pane(side)
            .outline()
            .get(index)
            .map(|item| item.page_index)
            .ok_or_else(|| anyhow!("outline entry {index} does not exist"))?;
        let changed = self.pane_mut(side).goto_page(page_index + 1);
        self.after_navigation(side, changed, now);
        Ok(())
    }

    /// With sync on, fitting one pane fits both, each to its own geometry.
    fn fit_targets(&self, side: Side) -> Vec<Side> {
        if self.sync.is_enabled() {
            vec![side, side.other()]
        } else {
            vec![side]
        }
    }

    fn after_navigation(&mut self, side: Side, changed: bool, now: Instant) {
        if changed {
            let page = self.pane(side).state().active_page;
            self.emit(WorkspaceEvent::PageChanged { side, page });
        }
        self.notify_sync(side, now);
    }

    fn after_zoom(&mut self, side: Side, update: Option<ZoomUpdate>, now: Instant) {
        if let Some(update) = update {
            self.emit(WorkspaceEvent::Zoomed { side, update });
            self.notify_sync(side, now);
        }
    }

    fn notify_sync(&mut self, side: Side, now: Instant) -> Option<ScrollOutcome> {
        let snapshot = self.pane(side).snapshot()?;
        Some(self.sync.on_scroll(side, &snapshot, now))
    }

    /// A scroll event from the host, including the echoes of our own sync
    /// writes.
    pub fn scroll(
        &mut self,
        side: Side,
        scroll_top: f64,
        scroll_left: f64,
        now: Instant,
    ) -> Option<ScrollOutcome> {
        let before = self.pane(side).state().active_page;
        if let Some(change) = self.pane_mut(side).scroll_to(scroll_top, scroll_left) {
            if !change.evicted.is_empty() {
                self.emit(WorkspaceEvent::PagesEvicted {
                    side,
                    placeholders: change.evicted,
                });
            }
        }
        let page = self.pane(side).state().active_page;
        if page != before {
            self.emit(WorkspaceEvent::PageChanged { side, page });
        }
        self.notify_sync(side, now)
    }

    pub fn resize(&mut self, side: Side, viewport: ViewportSize) {
        self.pane_mut(side).set_viewport(viewport);
    }

    /// Animation-frame tick: flushes the latest pending scroll to the other
    /// pane.
    pub fn frame(&mut self, now: Instant) -> Option<SyncCommand> {
        let (left, right) = (&self.left, &self.right);
        let command = self.sync.on_frame(now, |side| match side {
            Side::Left => left.snapshot(),
            Side::Right => right.snapshot(),
        })?;
        let target = command.target;
        let before = self.pane(target).state().active_page;
        self.pane_mut(target).apply_sync(&command);
        let page = self.pane(target).state().active_page;
        if page != before {
            self.emit(WorkspaceEvent::PageChanged { side: target, page });
        }
        debug!(%target, position = command.position, "scroll mirrored");
        self.emit(WorkspaceEvent::Synced(command));
        Some(command)
    }

    /// Timer tick: hands settled zoom levels to the schedulers.
    pub fn tick(&mut self, now: Instant) {
        for side in Side::BOTH {
            if let Some(scale) = self.pane_mut(side).poll_zoom(now) {
                self.emit(WorkspaceEvent::ZoomSettled { side, scale });
            }
        }
    }

    pub async fn render_step(&mut self, side: Side, idle: bool) -> Option<RenderStep> {
        let step = self.pane_mut(side).render_step(idle).await;
        self.collect_render_events(side);
        if let Some(transform) = step.as_ref().and_then(|s| s.correction) {
            self.emit(WorkspaceEvent::SurfaceCorrected { side, transform });
        }
        step
    }

    /// Renders until neither pane has work left. Prerender work is included
    /// only when `idle`.
    pub async fn render_until_settled(&mut self, idle: bool) -> usize {
        let mut rendered = 0;
        loop {
            let mut progressed = false;
            for side in Side::BOTH {
                if self.render_step(side, idle).await.is_some() {
                    rendered += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return rendered;
            }
        }
    }

    fn collect_render_events(&mut self, side: Side) {
        for event in self.pane_mut(side).drain_render_events() {
            match event {
                SchedulerEvent::Rendered { page, scale, .. } => {
                    self.emit(WorkspaceEvent::PageRendered { side, page, scale });
                }
                SchedulerEvent::Canceled { page } => debug!(%side, page, "render canceled"),
                SchedulerEvent::Failed(error) => {
                    self.emit(WorkspaceEvent::RenderFailed { side, error });
                }
                SchedulerEvent::Oversized(error) => {
                    self.emit(WorkspaceEvent::PageTooLarge {
                        side,
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    fn require_page(&self, side: Side, page: usize) -> Result<()> {
        let count = self.pane(side).page_count();
        if count == 0 {
            bail!("no document is loaded in the {side} pane");
        }
        if page == 0 || page > count {
            bail!("page {page} is outside the {side} document (1..={count})");
        }
        Ok(())
    }

    /// Opens a comment draft at a point given in page percent.
    pub fn add_comment(&mut self, side: Side, page: usize, x: f64, y: f64) -> Result<CommentDraft> {
        self.require_page(side, page)?;
        Ok(self
            .annotations
            .add_comment(side, page, x, y, Vec::new(), None)
            .clone())
    }

    /// Opens a comment draft anchored on the current text selection. `None`
    /// when the selection is not over a page.
    pub fn comment_on_selection(
        &mut self,
        side: Side,
        client_rects: &[ClientRect],
        selected_text: Option<String>,
    ) -> Option<CommentDraft> {
        let geometry = self
            .selection
            .map(client_rects, &self.pane(side).page_containers())?;
        let (x, y) = geometry.anchor;
        Some(
            self.annotations
                .add_comment(side, geometry.page, x, y, geometry.rects, selected_text)
                .clone(),
        )
    }

    pub fn highlight_selection(
        &mut self,
        side: Side,
        client_rects: &[ClientRect],
        selected_text: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Annotation> {
        let geometry = self
            .selection
            .map(client_rects, &self.pane(side).page_containers())?;
        let annotation = self.annotations.add_highlight(
            side,
            geometry.page,
            geometry.rects,
            selected_text,
            &self.settings.author,
            now,
        );
        self.annotations_changed(side, now);
        Some(annotation)
    }

    pub fn edit_comment(&mut self, id: &str) -> Result<CommentDraft> {
        Ok(self.annotations.edit_comment(id)?.clone())
    }

    pub fn set_draft_text(&mut self, text: &str) -> Result<()> {
        Ok(self.annotations.set_draft_text(text)?)
    }

    pub fn cancel_draft(&mut self) -> Option<CommentDraft> {
        self.annotations.cancel_draft()
    }

    pub fn save_comment(&mut self, now: DateTime<Utc>) -> Result<Annotation> {
        let annotation = self.annotations.save_comment(&self.settings.author, now)?;
        self.annotations_changed(annotation.side, now);
        Ok(annotation)
    }

    pub fn delete_comment(&mut self, id: &str, now: DateTime<Utc>) -> Result<Annotation> {
        let removed = self.annotations.delete_comment(id)?;
        self.annotations_changed(removed.side, now);
        Ok(removed)
    }

    fn annotations_changed(&mut self, side: Side, now: DateTime<Utc>) {
        self.emit(WorkspaceEvent::AnnotationsChanged { side });
        if self.settings.auto_backup {
            self.backup(side, now);
        }
    }

    fn backup(&self, side: Side, now: DateTime<Utc>) {
        let Some(document) = self.pane(side).document() else {
            return;
        };
        let backup = AnnotationBackup {
            document: document.id,
            display_name: document.display_name.clone(),
            saved_at: iso_timestamp(now),
            annotations: self
                .annotations
                .for_side(side)
                .into_iter()
                .cloned()
                .collect(),
        };
        if let Err(err) = self.backups.save(&backup) {
            warn!(?err, %side, "annotation backup failed");
        }
    }

    /// Brings back the backed-up annotations of the document in `side`.
    pub fn restore_backup(&mut self, side: Side) -> Result<usize> {
        let id = self
            .pane(side)
            .document()
            .map(|d| d.id)
            .ok_or_else(|| anyhow!("no document is loaded in the {side} pane"))?;
        let Some(backup) = self.backups.load(id)? else {
            return Ok(0);
        };
        let annotations = backup
            .annotations
            .into_iter()
            .map(|annotation| Annotation { side, ..annotation })
            .collect();
        let restored = self.annotations.restore(annotations);
        self.emit(WorkspaceEvent::AnnotationsChanged { side });
        Ok(restored)
    }

    /// Writes the annotations of `side` into a copy of its document. The
    /// side stays dirty unless this succeeds.
    pub fn export(&mut self, side: Side, now: DateTime<Utc>) -> Result<ExportedDocument, ExportError> {
        match self.build_export(side, now) {
            Ok(exported) => {
                self.annotations.mark_clean(side);
                info!(%side, file = %exported.file_name, "annotations exported");
                self.emit(WorkspaceEvent::Exported {
                    side,
                    file_name: exported.file_name.clone(),
                });
                Ok(exported)
            }
            Err(err) => {
                warn!(%err, "export failed");
                self.emit(WorkspaceEvent::ExportFailed {
                    side,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn build_export(&self, side: Side, now: DateTime<Utc>) -> Result<ExportedDocument, ExportError> {
        let document = self
            .pane(side)
            .document()
            .ok_or(ExportError::NoDocument(side))?;
        let persist = |cause| ExportError::Persist { side, cause };
        let pages = self
            .persistence
            .read(&document.raw_bytes)
            .map_err(persist)?;
        let natives = self.annotations.native_pages(side, &pages, now);
        let bytes = self
            .persistence
            .write(&document.raw_bytes, &natives)
            .map_err(persist)?;
        Ok(ExportedDocument {
            file_name: self.settings.export.file_name(&document.display_name),
            bytes: Bytes::from(bytes),
        })
    }

    /// Follows the link under a point given in page percent.
    pub fn follow_link(
        &mut self,
        side: Side,
        page: usize,
        x: f64,
        y: f64,
        now: Instant,
    ) -> Option<LinkAction> {
        let action = self.pane(side).link_at(page, x, y)?;
        match &action {
            LinkAction::GoTo { page_index } => {
                let changed = self.pane_mut(side).goto_page(page_index + 1);
                self.after_navigation(side, changed, now);
            }
            LinkAction::Uri { uri } => self.emit(WorkspaceEvent::OpenUri { uri: uri.clone() }),
        }
        Some(action)
    }

    pub fn goto_destination(&mut self, side: Side, name: &str, now: Instant) -> bool {
        let Some(page) = self
            .pane(side)
            .document()
            .and_then(|d| d.resolve_destination(name))
        else {
            debug!(%side, name, "unknown destination");
            return false;
        };
        let changed = self.pane_mut(side).goto_page(page);
        self.after_navigation(side, changed, now);
        true
    }

    /// Searches the document of `side`, nearest pages first.
    pub async fn search(&self, side: Side, query: &str) -> Option<SearchOutcome> {
        let pane = self.pane(side);
        let engine = pane.search_engine()?;
        let document = Arc::clone(pane.document()?.engine());
        let start = pane.state().active_page;
        Some(engine.search(document, query, start).await)
    }

    pub fn search_results(&self, side: Side) -> Vec<SearchResult> {
        self.pane(side)
            .search_engine()
            .map(|engine| engine.results())
            .unwrap_or_default()
    }

    pub fn search_next(&mut self, side: Side, now: Instant) -> Option<SearchResult> {
        let result = self.pane(side).search_engine()?.next()?;
        self.reveal(side, &result, now);
        Some(result)
    }

    pub fn search_prev(&mut self, side: Side, now: Instant) -> Option<SearchResult> {
        let result = self.pane(side).search_engine()?.prev()?;
        self.reveal(side, &result, now);
        Some(result)
    }

    fn reveal(&mut self, side: Side, result: &SearchResult, now: Instant) {
        if self.pane(side).state().active_page != result.page {
            let changed = self.pane_mut(side).goto_page(result.page);
            self.after_navigation(side, changed, now);
        }
    }

    /// Highlights the current search match once its page has a text layer.
    pub async fn highlight_current(&self, side: Side) -> Option<Highlight> {
        let pane = self.pane(side);
        let engine = pane.search_engine()?;
        let layers = pane.text_layers()?;
        let result = engine.current()?;
        engine.highlight(&result, &layers).await
    }
}

//! Engine-agnostic core of a two-pane PDF viewer and annotator.
//!
//! Everything here is a state machine driven by the host: scroll, resize and
//! timer events go in, render jobs and events come out. The PDF engine and
//! the annotation writer sit behind the traits in [`engine`] and
//! [`annotations::native`].

pub mod annotations;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod pane;
pub mod scheduler;
pub mod search;
pub mod selection;
pub mod store;
pub mod sync;
pub mod text_layer;
pub mod transform;
pub mod viewport;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use annotations::native::{AnnotationPersistence, NativeAnnotation, NativePage, PageAnnotations};
pub use annotations::{Annotation, AnnotationStore, CommentDraft};
pub use config::{Calibration, ExportNaming, Settings, ZoomPreference};
pub use document::{document_id_for_bytes, DocumentHandle, DocumentId};
pub use engine::{
    CancelToken, DocumentEngine, EngineDocument, LinkAction, LinkDefinition, NormalizedRect,
    OutlineItem, PageSize, Surface, TextFragment,
};
pub use error::{
    AnnotationError, ConfigError, DocumentLoadError, EngineError, ExportError, PersistError,
    RenderError,
};
pub use pane::{Pane, PaneState, Side, ViewMode, ViewportSize};
pub use scheduler::{RenderJob, RenderScheduler, RenderedPage, SchedulerEvent};
pub use search::{Highlight, SearchEngine, SearchOutcome, SearchResult};
pub use store::{AnnotationBackup, BackupStore, FileBackupStore, MemoryBackupStore};
pub use sync::{ScrollOutcome, ScrollSnapshot, ScrollSyncEngine, SyncCommand};
pub use workspace::{Command, ExportedDocument, Workspace, WorkspaceEvent};

use thiserror::Error;

use crate::pane::Side;

/// Failure reported by a document engine implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("unsupported feature: {0}")]
    Unsupported(String),
    #[error("page index {0} out of range")]
    PageOutOfRange(usize),
    #[error("operation canceled")]
    Canceled,
    #[error("{0}")]
    Other(String),
}

/// Fatal for the pane that attempted the load; the other pane is unaffected.
#[derive(Debug, Error)]
#[error("failed to load {source_name}: {cause}")]
pub struct DocumentLoadError {
    pub source_name: String,
    #[source]
    pub cause: EngineError,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    /// Expected whenever a render is superseded; never surfaced to the user.
    #[error("render of page {page} canceled")]
    Canceled { page: usize },
    #[error(
        "page {page} would render at {width}x{height} pixels which exceeds the budget of \
         {budget} pixels; zoom out to view it"
    )]
    Oversized {
        page: usize,
        width: u32,
        height: u32,
        budget: u64,
    },
    #[error("page {page} failed to render: {detail}")]
    Engine { page: usize, detail: String },
}

impl RenderError {
    pub fn from_engine(page: usize, err: EngineError) -> Self {
        match err {
            EngineError::Canceled => RenderError::Canceled { page },
            other => RenderError::Engine {
                page,
                detail: other.to_string(),
            },
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RenderError::Canceled { .. })
    }

    pub fn page(&self) -> usize {
        match self {
            RenderError::Canceled { page }
            | RenderError::Oversized { page, .. }
            | RenderError::Engine { page, .. } => *page,
        }
    }
}

/// Failure of the annotation persistence library.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PersistError {
    #[error("cannot parse document: {0}")]
    Malformed(String),
    #[error("page {0} does not exist in the document")]
    PageOutOfRange(usize),
    #[error("cannot write document: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no document is loaded in the {0} pane")]
    NoDocument(Side),
    #[error("failed to export annotations for the {side} pane: {cause}")]
    Persist {
        side: Side,
        #[source]
        cause: PersistError,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnnotationError {
    #[error("comment text is empty")]
    EmptyComment,
    #[error("no comment is being edited")]
    NoDraft,
    #[error("unknown annotation {0}")]
    UnknownId(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

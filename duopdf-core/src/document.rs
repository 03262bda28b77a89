use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::engine::{DocumentEngine, EngineDocument, OutlineItem, PageSize};
use crate::error::{DocumentLoadError, EngineError};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("7b2c58f1-99c6-5a5c-a6ea-50f9e7f1cc20").expect("valid namespace UUID")
});

/// Stable id derived from the document bytes, so the same file yields the
/// same id wherever it was loaded from.
pub fn document_id_for_bytes(bytes: &[u8]) -> DocumentId {
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, bytes)
}

/// A loaded document, exclusively owned by one pane. Dropping it releases the
/// engine handle.
pub struct DocumentHandle {
    pub id: DocumentId,
    pub display_name: String,
    pub source_location: Option<String>,
    pub raw_bytes: Bytes,
    pub page_count: usize,
    pub outline: Vec<OutlineItem>,
    page_sizes: Vec<PageSize>,
    engine: Arc<dyn EngineDocument>,
}

impl DocumentHandle {
    #[instrument(skip(engine, bytes, display_name), fields(name))]
    pub async fn load<E: DocumentEngine + ?Sized>(
        engine: &E,
        bytes: Bytes,
        display_name: impl Into<String>,
        source_location: Option<String>,
    ) -> Result<Self, DocumentLoadError> {
        let display_name = display_name.into();
        tracing::Span::current().record("name", display_name.as_str());
        let fail = |cause: EngineError| DocumentLoadError {
            source_name: source_location
                .clone()
                .unwrap_or_else(|| display_name.clone()),
            cause,
        };

        let document = engine.load(bytes.clone()).await.map_err(fail)?;
        let page_count = document.page_count();
        if page_count == 0 {
            return Err(fail(EngineError::Malformed("document has no pages".into())));
        }
        let page_sizes = (0..page_count)
            .map(|index| document.page_size(index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;
        let outline = document.outline().unwrap_or_else(|err| {
            warn!(%err, "outline unavailable");
            Vec::new()
        });

        Ok(Self {
            id: document_id_for_bytes(&bytes),
            display_name,
            source_location,
            raw_bytes: bytes,
            page_count,
            outline,
            page_sizes,
            engine: document,
        })
    }

    pub fn engine(&self) -> &Arc<dyn EngineDocument> {
        &self.engine
    }

    pub fn page_sizes(&self) -> &[PageSize] {
        &self.page_sizes
    }

    /// Size of a 1-based page.
    pub fn page_size(&self, page: usize) -> Option<PageSize> {
        page.checked_sub(1)
            .and_then(|index| self.page_sizes.get(index))
            .copied()
    }

    /// Resolves a named destination to a 1-based page.
    pub fn resolve_destination(&self, name: &str) -> Option<usize> {
        self.engine
            .destination(name)
            .filter(|&index| index < self.page_count)
            .map(|index| index + 1)
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_pdf, FakeEngine};

    #[test]
    fn document_id_is_stable_for_same_bytes() {
        let first = document_id_for_bytes(b"%PDF-1.7 one");
        let second = document_id_for_bytes(b"%PDF-1.7 one");
        let other = document_id_for_bytes(b"%PDF-1.7 two");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn load_reads_geometry_and_identity() {
        let bytes = fake_pdf(4);
        let handle = DocumentHandle::load(&FakeEngine, bytes.clone(), "paper.pdf", None)
            .await
            .unwrap();
        assert_eq!(handle.page_count, 4);
        assert_eq!(handle.page_size(4), Some(PageSize::new(612.0, 792.0)));
        assert_eq!(handle.page_size(5), None);
        assert_eq!(handle.id, document_id_for_bytes(&bytes));
        assert_eq!(handle.raw_bytes, bytes);
    }

    #[tokio::test]
    async fn malformed_bytes_fail_with_source_name() {
        let err = DocumentHandle::load(
            &FakeEngine,
            Bytes::from_static(b"not a pdf"),
            "broken.pdf",
            Some("https://example.org/broken.pdf".into()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.source_name, "https://example.org/broken.pdf");
        assert!(matches!(err.cause, EngineError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let err = DocumentHandle::load(&FakeEngine, fake_pdf(0), "empty.pdf", None)
            .await
            .unwrap_err();
        assert_eq!(err.source_name, "empty.pdf");
    }
}

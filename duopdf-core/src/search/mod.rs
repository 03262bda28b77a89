//! Progressive full-text search over one document, and highlighting of the
//! selected match in the rendered text layer.

pub mod extract;
pub mod reconcile;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::Calibration;
use crate::engine::EngineDocument;
use crate::geometry::PercentRect;
use crate::text_layer::{SpanRange, TextLayerRegistry};

pub use extract::{extract_page_text, PageText, SpacingRules, TextCache};
pub use reconcile::{locate, Located, MatchContext, ReconcileParams, Strategy};

use reconcile::{fold, folded_chars, occurrences};

/// Characters of context kept on each side of a match in its snippet.
const SNIPPET_CONTEXT: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub page: usize,
    pub text_offset: usize,
    pub match_length: usize,
    pub snippet: String,
    pub snippet_match_start: usize,
    pub snippet_match_end: usize,
    pub occurrence_index_on_page: usize,
}

impl SearchResult {
    fn key(&self) -> (usize, usize) {
        (self.page, self.text_offset)
    }

    /// Context anchors for reconciliation, taken from the snippet.
    pub fn anchors(&self, anchor_length: usize) -> (String, String) {
        let chars: Vec<char> = self.snippet.chars().collect();
        let start = self.snippet_match_start.min(chars.len());
        let end = self.snippet_match_end.min(chars.len());
        let before: String = chars[start.saturating_sub(anchor_length)..start]
            .iter()
            .collect();
        let after: String = chars[end..(end + anchor_length).min(chars.len())]
            .iter()
            .collect();
        (before, after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Complete,
    /// A newer search started; this one stopped without touching results.
    Superseded,
}

/// Highlight markers for one located match.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub page: usize,
    pub offset: usize,
    pub length: usize,
    pub strategy: Strategy,
    pub ranges: Vec<SpanRange>,
    /// Rect of the first marker's matched characters, to be centred in the
    /// viewport.
    pub focus: Option<PercentRect>,
}

/// Pages in proximity order: `start..=count`, then `1..start`.
pub fn proximity_order(start: usize, page_count: usize) -> Vec<usize> {
    if page_count == 0 {
        return Vec::new();
    }
    let start = start.clamp(1, page_count);
    (start..=page_count).chain(1..start).collect()
}

/// All case-insensitive matches of `query` in one page, in text order.
pub fn find_in_page(page: &PageText, query: &str) -> Vec<SearchResult> {
    let needle = folded_chars(query);
    let chars: Vec<char> = page.text.chars().collect();
    let haystack: Vec<char> = chars.iter().copied().map(fold).collect();
    occurrences(&haystack, &needle)
        .into_iter()
        .enumerate()
        .map(|(occurrence, offset)| {
            let start = offset.saturating_sub(SNIPPET_CONTEXT);
            let end = (offset + needle.len() + SNIPPET_CONTEXT).min(chars.len());
            SearchResult {
                page: page.page,
                text_offset: offset,
                match_length: needle.len(),
                snippet: chars[start..end].iter().collect(),
                snippet_match_start: offset - start,
                snippet_match_end: offset - start + needle.len(),
                occurrence_index_on_page: occurrence,
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct SearchState {
    query: String,
    results: Vec<SearchResult>,
    current: Option<(usize, usize)>,
    complete: bool,
}

/// Search state for the document of one pane.
///
/// Every search bumps a generation counter; work belonging to an older
/// generation notices at its next suspension point and stops.
pub struct SearchEngine {
    generation: AtomicU64,
    state: Mutex<SearchState>,
    cache: Arc<TextCache>,
    calibration: Calibration,
}

impl SearchEngine {
    pub fn new(cache: Arc<TextCache>, calibration: Calibration) -> Self {
        Self {
            generation: AtomicU64::new(0),
            state: Mutex::new(SearchState::default()),
            cache,
            calibration,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn query(&self) -> String {
        self.state.lock().query.clone()
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.state.lock().results.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn current(&self) -> Option<SearchResult> {
        let state = self.state.lock();
        let key = state.current?;
        state.results.iter().find(|r| r.key() == key).cloned()
    }

    /// Abandons any running search and clears results.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = SearchState::default();
    }

    /// Searches every page, starting at `start_page` and wrapping, merging
    /// each page's matches into the page/offset ordered result list as soon
    /// as that page is extracted.
    #[instrument(skip(self, document), fields(query = %query))]
    pub async fn search(
        &self,
        document: Arc<dyn EngineDocument>,
        query: &str,
        start_page: usize,
    ) -> SearchOutcome {
        // The generation only moves while the state lock is held, so a check
        // made under that lock cannot be overtaken by a newer search.
        let generation = {
            let mut state = self.state.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = SearchState {
                query: query.to_string(),
                complete: query.trim().is_empty(),
                ..SearchState::default()
            };
            generation
        };
        if query.trim().is_empty() {
            return SearchOutcome::Complete;
        }

        for page in proximity_order(start_page, document.page_count()) {
            let extracted = self.cache.get_or_extract(&document, page).await;
            if !self.is_current(generation) {
                debug!(generation, "search superseded");
                return SearchOutcome::Superseded;
            }
            match extracted {
                Ok(text) => {
                    let found = find_in_page(&text, query);
                    if !found.is_empty() {
                        let mut state = self.state.lock();
                        if !self.is_current(generation) {
                            debug!(generation, "search superseded");
                            return SearchOutcome::Superseded;
                        }
                        state.results.extend(found);
                        state.results.sort_by_key(SearchResult::key);
                    }
                }
                Err(err) => warn!(?err, page, "text extraction failed; skipping page"),
            }
            tokio::task::yield_now().await;
            if !self.is_current(generation) {
                debug!(generation, "search superseded");
                return SearchOutcome::Superseded;
            }
        }

        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return SearchOutcome::Superseded;
        }
        state.complete = true;
        SearchOutcome::Complete
    }

    /// Moves to the match after the current one, wrapping to the first.
    pub fn next(&self) -> Option<SearchResult> {
        let mut state = self.state.lock();
        let next = match state.current {
            Some(key) => state
                .results
                .iter()
                .find(|r| r.key() > key)
                .or_else(|| state.results.first()),
            None => state.results.first(),
        }
        .cloned();
        state.current = next.as_ref().map(SearchResult::key);
        next
    }

    /// Moves to the match before the current one, wrapping to the last.
    pub fn prev(&self) -> Option<SearchResult> {
        let mut state = self.state.lock();
        let prev = match state.current {
            Some(key) => state
                .results
                .iter()
                .rev()
                .find(|r| r.key() < key)
                .or_else(|| state.results.last()),
            None => state.results.last(),
        }
        .cloned();
        state.current = prev.as_ref().map(SearchResult::key);
        prev
    }

    pub fn match_context(&self, result: &SearchResult) -> MatchContext {
        let (anchor_before, anchor_after) = result.anchors(self.calibration.anchor_length);
        MatchContext {
            query: self.query(),
            text_offset: result.text_offset,
            occurrence: result.occurrence_index_on_page,
            anchor_before,
            anchor_after,
        }
    }

    /// Locates `result` in the page's rendered text layer.
    ///
    /// Waits for the layer's readiness signal first; timed retries remain only
    /// as a fallback for layers that are rebuilt while we look. A miss is
    /// silent: the result list still reflects the logical match.
    pub async fn highlight(
        &self,
        result: &SearchResult,
        layers: &TextLayerRegistry,
    ) -> Option<Highlight> {
        let generation = self.generation();
        let context = self.match_context(result);
        let params = ReconcileParams {
            length_tolerance: self.calibration.direct_length_tolerance,
            anchor_window: self.calibration.anchor_window,
        };
        let extracted = self.cache.get(result.page)?;
        let attempts = self.calibration.highlight_retry_attempts.max(1);
        let delay = self.calibration.highlight_retry_delay;

        layers
            .wait_ready(result.page, delay * attempts as u32)
            .await;

        for attempt in 0..attempts {
            if !self.is_current(generation) {
                return None;
            }
            if let Some(layer) = layers.current(result.page) {
                if let Some(located) = locate(&extracted.text, layer.text(), &context, params) {
                    let ranges = layer.ranges_for(located.offset, result.match_length);
                    let focus = ranges.first().and_then(|range| layer.range_rect(range));
                    return Some(Highlight {
                        page: result.page,
                        offset: located.offset,
                        length: result.match_length,
                        strategy: located.strategy,
                        ranges,
                        focus,
                    });
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        debug!(
            page = result.page,
            offset = result.text_offset,
            "match could not be located in the text layer"
        );
        None
    }
}

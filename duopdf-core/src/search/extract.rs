use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{EngineDocument, TextFragment};
use crate::error::EngineError;

/// Extracted text of one page with a reverse map from every character back
/// to the fragment it came from; `None` marks a synthesized space.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: usize,
    pub text: String,
    pub char_to_fragment: Vec<Option<usize>>,
}

impl PageText {
    pub fn char_len(&self) -> usize {
        self.char_to_fragment.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpacingRules {
    pub gap_ratio: f32,
    pub line_tolerance_ratio: f32,
}

fn ends_with_whitespace(s: &str) -> bool {
    s.chars().last().map_or(true, char::is_whitespace)
}

fn starts_with_whitespace(s: &str) -> bool {
    s.chars().next().map_or(true, char::is_whitespace)
}

/// Concatenates fragments, inserting a space where the layout implies one:
/// across line changes, and where the horizontal gap exceeds `gap_ratio`
/// of the fragment height, unless either side already carries whitespace.
pub fn extract_page_text(page: usize, fragments: &[TextFragment], rules: SpacingRules) -> PageText {
    let mut text = String::new();
    let mut char_to_fragment = Vec::new();
    let mut previous: Option<&TextFragment> = None;

    for (index, fragment) in fragments.iter().enumerate() {
        if fragment.text.is_empty() {
            continue;
        }
        if let Some(prev) = previous {
            let height = prev.height.max(fragment.height).max(f32::EPSILON);
            let new_line =
                prev.has_eol || (fragment.y - prev.y).abs() > height * rules.line_tolerance_ratio;
            let gap = fragment.x - (prev.x + prev.width);
            let wide_gap = gap > height * rules.gap_ratio;
            if (new_line || wide_gap)
                && !ends_with_whitespace(&prev.text)
                && !starts_with_whitespace(&fragment.text)
            {
                text.push(' ');
                char_to_fragment.push(None);
            }
        }
        for ch in fragment.text.chars() {
            text.push(ch);
            char_to_fragment.push(Some(index));
        }
        previous = Some(fragment);
    }

    PageText {
        page,
        text,
        char_to_fragment,
    }
}

/// Extracted page text, cached for the lifetime of one loaded document.
pub struct TextCache {
    rules: SpacingRules,
    pages: Mutex<HashMap<usize, Arc<PageText>>>,
}

impl TextCache {
    pub fn new(rules: SpacingRules) -> Self {
        Self {
            rules,
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, page: usize) -> Option<Arc<PageText>> {
        self.pages.lock().get(&page).cloned()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self) {
        self.pages.lock().clear();
    }

    /// Returns the cached text of `page` (1-based), extracting it off the
    /// interaction path on first use.
    pub async fn get_or_extract(
        &self,
        document: &Arc<dyn EngineDocument>,
        page: usize,
    ) -> Result<Arc<PageText>, EngineError> {
        if let Some(hit) = self.get(page) {
            return Ok(hit);
        }
        let page_index = page
            .checked_sub(1)
            .ok_or(EngineError::PageOutOfRange(0))?;
        let engine = Arc::clone(document);
        let fragments = tokio::task::spawn_blocking(move || engine.text_content(page_index))
            .await
            .map_err(|err| EngineError::Other(format!("text extraction task failed: {err}")))??;
        let extracted = Arc::new(extract_page_text(page, &fragments, self.rules));
        debug!(page, chars = extracted.char_len(), "extracted page text");
        self.pages
            .lock()
            .entry(page)
            .or_insert_with(|| Arc::clone(&extracted));
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: SpacingRules = SpacingRules {
        gap_ratio: 0.12,
        line_tolerance_ratio: 0.5,
    };

    #[test]
    fn inserts_space_for_wide_gap_on_same_line() {
        let fragments = vec![
            TextFragment::new("Hello", 10.0, 700.0, 50.0, 10.0),
            TextFragment::new("world", 62.0, 700.0, 50.0, 10.0),
        ];
        let page = extract_page_text(1, &fragments, RULES);
        assert_eq!(page.text, "Hello world");
        assert_eq!(page.char_to_fragment[5], None);
        assert_eq!(page.char_to_fragment[6], Some(1));
    }

    #[test]
    fn joins_tight_fragments_without_space() {
        let fragments = vec![
            TextFragment::new("Hel", 10.0, 700.0, 30.0, 10.0),
            TextFragment::new("lo", 40.5, 700.0, 20.0, 10.0),
        ];
        assert_eq!(extract_page_text(1, &fragments, RULES).text, "Hello");
    }

    #[test]
    fn inserts_space_across_lines() {
        let fragments = vec![
            TextFragment::new("end of line", 10.0, 700.0, 100.0, 10.0),
            TextFragment::new("next", 10.0, 686.0, 40.0, 10.0),
        ];
        assert_eq!(
            extract_page_text(1, &fragments, RULES).text,
            "end of line next"
        );
    }

    #[test]
    fn respects_existing_whitespace() {
        let fragments = vec![
            TextFragment::new("trailing ", 10.0, 700.0, 90.0, 10.0),
            TextFragment::new("word", 200.0, 700.0, 40.0, 10.0),
        ];
        let page = extract_page_text(1, &fragments, RULES);
        assert_eq!(page.text, "trailing word");
        assert!(page.char_to_fragment.iter().all(Option::is_some));
    }

    #[test]
    fn end_of_line_flag_forces_space() {
        let mut first = TextFragment::new("a", 10.0, 700.0, 5.0, 10.0);
        first.has_eol = true;
        let fragments = vec![first, TextFragment::new("b", 15.0, 700.0, 5.0, 10.0)];
        assert_eq!(extract_page_text(1, &fragments, RULES).text, "a b");
    }
}

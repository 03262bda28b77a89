//! Locating an extracted-text match inside the rendered text layer.
//!
//! Extraction inserts spaces the text layer does not contain (and engines
//! occasionally disagree on ligatures or ordering), so a match offset cannot
//! be used blindly. Three strategies are tried in order, and every candidate
//! is verified against the rendered text before it is accepted.

/// Which strategy produced an accepted offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Anchor,
    Occurrence,
}

/// What is known about a match from the extraction side.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchContext {
    pub query: String,
    pub text_offset: usize,
    pub occurrence: usize,
    pub anchor_before: String,
    pub anchor_after: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileParams {
    pub length_tolerance: usize,
    pub anchor_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub offset: usize,
    pub strategy: Strategy,
}

/// Single-char case folding keeps character offsets stable.
pub(crate) fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

pub(crate) fn folded_chars(s: &str) -> Vec<char> {
    s.chars().map(fold).collect()
}

fn strip_whitespace(chars: &[char]) -> String {
    chars.iter().filter(|c| !c.is_whitespace()).collect()
}

/// Non-overlapping occurrences of `needle` in `haystack`, both pre-folded.
pub(crate) fn occurrences(haystack: &[char], needle: &[char]) -> Vec<usize> {
    let mut found = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return found;
    }
    let mut pos = 0;
    while pos + needle.len() <= haystack.len() {
        if haystack[pos..pos + needle.len()] == *needle {
            found.push(pos);
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    found
}

/// True when the rendered text at `offset` equals the query, ignoring case.
pub fn verify(dom_text: &str, offset: usize, query: &str) -> bool {
    let needle = folded_chars(query);
    if needle.is_empty() {
        return false;
    }
    let candidate: Vec<char> = dom_text
        .chars()
        .skip(offset)
        .take(needle.len())
        .map(fold)
        .collect();
    candidate == needle
}

/// Trusts the extraction offset when both texts have nearly the same length.
pub fn direct_position(
    extracted_text: &str,
    dom_text: &str,
    context: &MatchContext,
    length_tolerance: usize,
) -> Option<usize> {
    let extracted_len = extracted_text.chars().count();
    let dom_len = dom_text.chars().count();
    if extracted_len.abs_diff(dom_len) > length_tolerance {
        return None;
    }
    verify(dom_text, context.text_offset, &context.query).then_some(context.text_offset)
}

/// Finds the occurrence whose surroundings contain both context anchors.
///
/// Candidates are the query's occurrences in the rendered text whose
/// whitespace-free context window contains the anchors; the context's
/// occurrence index picks among several, and a lone candidate wins outright.
pub fn anchor_match(dom_text: &str, context: &MatchContext, window: usize) -> Option<usize> {
    let haystack = folded_chars(dom_text);
    let needle = folded_chars(&context.query);
    let before = strip_whitespace(&folded_chars(&context.anchor_before));
    let after = strip_whitespace(&folded_chars(&context.anchor_after));
    if before.is_empty() && after.is_empty() {
        return None;
    }

    let candidates: Vec<usize> = occurrences(&haystack, &needle)
        .into_iter()
        .filter(|&pos| {
            let start = pos.saturating_sub(window);
            let end = (pos + needle.len() + window).min(haystack.len());
            let context_before = strip_whitespace(&haystack[start..pos]);
            let context_after = strip_whitespace(&haystack[pos + needle.len()..end]);
            context_before.contains(&before) && context_after.contains(&after)
        })
        .collect();

    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        _ => candidates
            .get(context.occurrence)
            .or_else(|| candidates.first())
            .copied(),
    }
}

/// Last resort: the k-th bare occurrence, no context check.
pub fn occurrence_count(dom_text: &str, context: &MatchContext) -> Option<usize> {
    let haystack = folded_chars(dom_text);
    let needle = folded_chars(&context.query);
    occurrences(&haystack, &needle)
        .get(context.occurrence)
        .copied()
}

/// Runs the cascade; each candidate must pass [`verify`] to be accepted.
pub fn locate(
    extracted_text: &str,
    dom_text: &str,
    context: &MatchContext,
    params: ReconcileParams,
) -> Option<Located> {
    let attempts: [(Strategy, Option<usize>); 3] = [
        (
            Strategy::Direct,
            direct_position(extracted_text, dom_text, context, params.length_tolerance),
        ),
        (
            Strategy::Anchor,
            anchor_match(dom_text, context, params.anchor_window),
        ),
        (Strategy::Occurrence, occurrence_count(dom_text, context)),
    ];
    attempts.into_iter().find_map(|(strategy, offset)| {
        offset
            .filter(|&offset| verify(dom_text, offset, &context.query))
            .map(|offset| Located { offset, strategy })
    })
}

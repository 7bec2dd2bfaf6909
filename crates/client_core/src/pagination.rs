//! Splits a phase's combined content into viewport-sized pages.
//!
//! The combined content is the phase text, with `#N` cross-references
//! rewritten into `[#N](ref://N)` deep links, followed by a markdown
//! rendering of the structured attachments (vector hits first, then web
//! hits, numbered from 1 in that order). Pages are exact slices of the
//! combined content: concatenating them gives it back byte for byte.

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::{
    domain::TurnId,
    phase::Phase,
    protocol::{VectorResult, WebResult},
};
use tracing::{debug, warn};

use crate::{
    measure::TextMeasure,
    page_cache::{PageCache, PageCacheKey, Pages},
    store::PhaseResult,
};

const MAX_REFERENCE_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Whole-point dimensions used for both measuring and cache keys, so
    /// sub-point jitter maps to the same pages.
    pub fn rounded(&self) -> (u32, u32) {
        (round_dimension(self.width), round_dimension(self.height))
    }
}

fn round_dimension(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedContent {
    pub text: String,
    /// Byte ranges of rewritten deep links; a page never ends inside one.
    pub references: Vec<Range<usize>>,
}

impl CombinedContent {
    pub fn render(text: &str, vector_results: &[VectorResult], web_results: &[WebResult]) -> Self {
        let mut combined = Self::default();
        let reference_count = vector_results.len() + web_results.len();
        rewrite_references(
            text,
            reference_count,
            &mut combined.text,
            &mut combined.references,
        );
        render_attachments(vector_results, web_results, &mut combined.text);
        combined
    }
}

fn rewrite_references(text: &str, reference_count: usize, out: &mut String, spans: &mut Vec<Range<usize>>) {
    let bytes = text.as_bytes();
    let mut copied = 0;
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] != b'#' || !reference_may_start(text, index) {
            index += 1;
            continue;
        }

        let digits_start = index + 1;
        let digits_end = digits_start
            + bytes[digits_start..]
                .iter()
                .take_while(|byte| byte.is_ascii_digit())
                .count();
        let digit_count = digits_end - digits_start;
        let number = match text[digits_start..digits_end].parse::<usize>() {
            Ok(number)
                if digit_count <= MAX_REFERENCE_DIGITS
                    && (1..=reference_count).contains(&number)
                    && reference_may_end(text, digits_end) =>
            {
                number
            }
            _ => {
                index = digits_end.max(index + 1);
                continue;
            }
        };

        out.push_str(&text[copied..index]);
        let start = out.len();
        out.push_str(&format!("[#{number}](ref://{number})"));
        spans.push(start..out.len());
        index = digits_end;
        copied = digits_end;
    }

    out.push_str(&text[copied..]);
}

fn reference_may_start(text: &str, index: usize) -> bool {
    match text[..index].chars().next_back() {
        None => true,
        Some(prev) => !prev.is_alphanumeric() && !matches!(prev, '#' | '[' | '&' | '/' | '_'),
    }
}

fn reference_may_end(text: &str, index: usize) -> bool {
    match text[index..].chars().next() {
        None => true,
        Some(next) => !next.is_alphanumeric() && next != '_',
    }
}

fn render_attachments(vector_results: &[VectorResult], web_results: &[WebResult], out: &mut String) {
    let mut number = 0;

    if !vector_results.is_empty() {
        start_section(out, "Memory");
        for hit in vector_results {
            number += 1;
            out.push_str(&format!("\n**[{number}]** {}", hit.content.trim()));
            match &hit.provider {
                Some(provider) => out.push_str(&format!(" _({provider}, score {:.2})_", hit.score)),
                None => out.push_str(&format!(" _(score {:.2})_", hit.score)),
            }
            out.push('\n');
        }
    }

    if !web_results.is_empty() {
        start_section(out, "Web");
        for hit in web_results {
            number += 1;
            out.push_str(&format!("\n**[{number}]** [{}]({})", hit.title.trim(), hit.url.trim()));
            if let Some(provider) = &hit.provider {
                out.push_str(&format!(" _({provider})_"));
            }
            out.push('\n');
            let content = hit.content.trim();
            if !content.is_empty() {
                out.push_str(content);
                out.push('\n');
            }
        }
    }
}

fn start_section(out: &mut String, title: &str) {
    if out.ends_with('\n') {
        out.push('\n');
    } else if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str("### ");
    out.push_str(title);
    out.push('\n');
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSplit {
    pub pages: Vec<String>,
    /// Times measurement made no progress and one unit was forced.
    pub forced_advances: usize,
}

/// Uncached pagination of one phase's content. Deterministic for a given
/// input and measurement oracle; never returns zero pages.
pub fn paginate_content(
    text: &str,
    vector_results: &[VectorResult],
    web_results: &[WebResult],
    viewport: Viewport,
    measure: &dyn TextMeasure,
) -> PageSplit {
    let combined = CombinedContent::render(text, vector_results, web_results);
    split_pages(&combined, viewport, measure)
}

pub fn split_pages(combined: &CombinedContent, viewport: Viewport, measure: &dyn TextMeasure) -> PageSplit {
    let text = combined.text.as_str();
    if text.is_empty() {
        return PageSplit {
            pages: vec![String::new()],
            forced_advances: 0,
        };
    }

    let (width, height) = viewport.rounded();
    let mut pages = Vec::new();
    let mut forced_advances = 0;
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        let reported = measure.fits(rest, f64::from(width), f64::from(height));
        let mut end = start + floor_char_boundary(rest, reported);

        if end < text.len() {
            end = soft_break(text, start, end);
            end = keep_references_whole(&combined.references, start, end);
        }

        if end <= start {
            forced_advances += 1;
            end = forced_unit_end(text, &combined.references, start);
        }

        pages.push(text[start..end].to_string());
        start = end;
    }

    if forced_advances > 0 {
        warn!(
            forced_advances,
            width,
            height,
            pages = pages.len(),
            "measurement made no progress; forced units onto pages"
        );
    }

    PageSplit {
        pages,
        forced_advances,
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Moves a mid-word page end back to just after the last whitespace on the
/// page, when the page has one.
fn soft_break(text: &str, start: usize, end: usize) -> usize {
    let before = text[..end].chars().next_back();
    let after = text[end..].chars().next();
    let mid_word = matches!(
        (before, after),
        (Some(before), Some(after)) if !before.is_whitespace() && !after.is_whitespace()
    );
    if !mid_word {
        return end;
    }

    text[start..end]
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(offset, ch)| start + offset + ch.len_utf8())
        .unwrap_or(end)
}

fn keep_references_whole(references: &[Range<usize>], start: usize, end: usize) -> usize {
    match references.iter().find(|span| span.start < end && end < span.end) {
        Some(span) if span.start > start => span.start,
        Some(span) => span.end,
        None => end,
    }
}

fn forced_unit_end(text: &str, references: &[Range<usize>], start: usize) -> usize {
    if let Some(span) = references.iter().find(|span| span.start == start) {
        return span.end;
    }
    text[start..]
        .chars()
        .next()
        .map(|ch| start + ch.len_utf8())
        .unwrap_or(text.len())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationStats {
    pub hits: u64,
    pub computations: u64,
    pub forced_advances: u64,
}

/// Cached pagination. The cache is owned here and only ever written by
/// `paginate`; redundant calls for the same key are harmless.
pub struct PaginationEngine {
    measure: Arc<dyn TextMeasure>,
    cache: Mutex<PageCache>,
    hits: AtomicU64,
    computations: AtomicU64,
    forced_advances: AtomicU64,
}

impl PaginationEngine {
    pub fn new(measure: Arc<dyn TextMeasure>, cache_turns: usize) -> Self {
        Self {
            measure,
            cache: Mutex::new(PageCache::new(cache_turns)),
            hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            forced_advances: AtomicU64::new(0),
        }
    }

    pub fn paginate(&self, turn_id: TurnId, phase: Phase, result: &PhaseResult, viewport: Viewport) -> Pages {
        let (width, height) = viewport.rounded();
        let key = PageCacheKey {
            turn_id,
            phase,
            width,
            height,
            content: result.digest(),
        };

        if let Some(pages) = self.cache().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return pages;
        }

        let split = paginate_content(
            &result.content,
            &result.vector_results,
            &result.web_results,
            viewport,
            self.measure.as_ref(),
        );
        self.computations.fetch_add(1, Ordering::Relaxed);
        self.forced_advances
            .fetch_add(split.forced_advances as u64, Ordering::Relaxed);
        debug!(
            turn_id = %turn_id,
            %phase,
            width,
            height,
            pages = split.pages.len(),
            "paginated phase content"
        );

        let pages: Pages = split.pages.into();
        self.cache().insert(key, Arc::clone(&pages));
        pages
    }

    pub fn invalidate_turn(&self, turn_id: TurnId) -> usize {
        self.cache().invalidate_turn(turn_id)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache().len()
    }

    pub fn stats(&self) -> PaginationStats {
        PaginationStats {
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            forced_advances: self.forced_advances.load(Ordering::Relaxed),
        }
    }

    fn cache(&self) -> MutexGuard<'_, PageCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;

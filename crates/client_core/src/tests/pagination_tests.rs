use std::sync::atomic::AtomicUsize;

use super::*;
use crate::measure::MonospaceMeasure;

struct ZeroMeasure;

impl TextMeasure for ZeroMeasure {
    fn fits(&self, _text: &str, _width: f64, _height: f64) -> usize {
        0
    }
}

fn memory_hit(content: &str) -> VectorResult {
    VectorResult {
        content: content.to_string(),
        score: 0.5,
        provider: None,
        id: None,
    }
}

fn engine() -> PaginationEngine {
    PaginationEngine::new(Arc::new(MonospaceMeasure::new(10.0, 20.0)), 4)
}

fn long_text() -> String {
    let mut text = String::new();
    for index in 0..180 {
        text.push_str(&format!("word{index} "));
        if index % 17 == 0 {
            text.push_str("see #1.\n\n");
        }
    }
    text
}

fn assert_no_split_reference(combined: &CombinedContent, pages: &[String]) {
    let mut offset = 0;
    for page in pages {
        offset += page.len();
        assert!(
            !combined
                .references
                .iter()
                .any(|span| span.start < offset && offset < span.end),
            "page boundary {offset} splits a reference"
        );
    }
}

#[test]
fn empty_content_yields_single_empty_page() {
    let split = paginate_content("", &[], &[], Viewport::new(320.0, 480.0), &ZeroMeasure);
    assert_eq!(split.pages, vec![String::new()]);
    assert_eq!(split.forced_advances, 0);

    let pages = engine().paginate(
        TurnId(1),
        Phase::Action,
        &PhaseResult::default(),
        Viewport::new(320.0, 480.0),
    );
    assert_eq!(pages.as_ref(), [String::new()]);
}

#[test]
fn attachments_render_after_text_in_source_order() {
    let combined = CombinedContent::render(
        "Answer #2",
        &[VectorResult {
            content: "fact".to_string(),
            score: 0.9,
            provider: Some("pc".to_string()),
            id: None,
        }],
        &[WebResult {
            title: "Rust".to_string(),
            url: "https://rust-lang.org".to_string(),
            content: "home".to_string(),
            provider: None,
        }],
    );

    assert_eq!(
        combined.text,
        "Answer [#2](ref://2)\n\n### Memory\n\n**[1]** fact _(pc, score 0.90)_\n\n### Web\n\n**[2]** [Rust](https://rust-lang.org)\nhome\n"
    );
    assert_eq!(combined.references, vec![7..20]);
}

#[test]
fn attachments_without_text_have_no_leading_gap() {
    let combined = CombinedContent::render("", &[memory_hit("only")], &[]);
    assert_eq!(combined.text, "### Memory\n\n**[1]** only _(score 0.50)_\n");
}

#[test]
fn only_resolvable_references_are_rewritten() {
    let combined = CombinedContent::render(
        "# Title\nIssue #42, #1st, a#1, [#1](x), ##1 and (#1)",
        &[memory_hit("m")],
        &[],
    );

    assert!(combined
        .text
        .starts_with("# Title\nIssue #42, #1st, a#1, [#1](x), ##1 and ([#1](ref://1))"));
    assert_eq!(combined.references.len(), 1);
}

#[test]
fn references_are_never_split_across_pages() {
    let combined = CombinedContent::render("Look at #1 now", &[memory_hit("x")], &[]);
    // 10 columns x 1 row.
    let split = split_pages(&combined, Viewport::new(100.0, 20.0), &MonospaceMeasure::new(10.0, 20.0));

    assert_eq!(split.pages[0], "Look at ");
    assert_eq!(split.pages[1], "[#1](ref://1)");
    assert_no_split_reference(&combined, &split.pages);
    assert_eq!(split.pages.concat(), combined.text);
}

#[test]
fn pages_concatenate_back_to_combined_content() {
    let text = long_text();
    let vectors = [memory_hit("first memory"), memory_hit("second memory")];
    let web = [WebResult {
        title: "Docs".to_string(),
        url: "https://docs.rs".to_string(),
        content: "documentation".to_string(),
        provider: Some("brave".to_string()),
    }];
    let measure = MonospaceMeasure::new(8.0, 16.0);
    let viewport = Viewport::new(200.0, 96.0);

    let split = paginate_content(&text, &vectors, &web, viewport, &measure);
    let combined = CombinedContent::render(&text, &vectors, &web);

    assert!(split.pages.len() > 1);
    assert_eq!(split.pages.concat(), combined.text);
    assert_no_split_reference(&combined, &split.pages);
    assert_eq!(split.forced_advances, 0);
}

#[test]
fn pagination_is_deterministic() {
    let text = long_text();
    let measure = MonospaceMeasure::new(9.0, 18.0);
    let viewport = Viewport::new(180.0, 90.0);
    let first = paginate_content(&text, &[memory_hit("m")], &[], viewport, &measure);
    let second = paginate_content(&text, &[memory_hit("m")], &[], viewport, &measure);
    assert_eq!(first, second);
}

#[test]
fn mid_word_breaks_back_off_to_whitespace() {
    let measure = MonospaceMeasure::new(1.0, 1.0);
    let split = paginate_content("hello world foo", &[], &[], Viewport::new(8.0, 1.0), &measure);
    assert_eq!(split.pages, vec!["hello ", "world ", "foo"]);
}

#[test]
fn unbreakable_words_are_hard_split() {
    let measure = MonospaceMeasure::new(1.0, 1.0);
    let split = paginate_content("abcdefghij", &[], &[], Viewport::new(4.0, 1.0), &measure);
    assert_eq!(split.pages, vec!["abcd", "efgh", "ij"]);
}

#[test]
fn zero_progress_measurement_still_terminates() {
    let combined = CombinedContent::render("ab #1", &[memory_hit("x")], &[]);
    let split = split_pages(&combined, Viewport::new(0.0, 0.0), &ZeroMeasure);

    assert_eq!(split.pages[..4], ["a", "b", " ", "[#1](ref://1)"]);
    assert_eq!(split.forced_advances, split.pages.len());
    assert_eq!(split.pages.concat(), combined.text);
}

/// Reports no room until it has been asked `stalls` times.
struct StallingMeasure {
    stalls: AtomicUsize,
}

impl TextMeasure for StallingMeasure {
    fn fits(&self, text: &str, _width: f64, _height: f64) -> usize {
        let remaining = self.stalls.load(Ordering::Relaxed);
        if remaining > 0 {
            self.stalls.store(remaining - 1, Ordering::Relaxed);
            0
        } else {
            text.len()
        }
    }
}

#[test]
fn forced_advances_count_only_stalled_pages() {
    let combined = CombinedContent::render("stalled then fine", &[], &[]);
    let measure = StallingMeasure {
        stalls: AtomicUsize::new(2),
    };
    let split = split_pages(&combined, Viewport::new(100.0, 100.0), &measure);

    assert_eq!(split.pages, ["s", "t", "alled then fine"]);
    assert_eq!(split.forced_advances, 2);
}

#[test]
fn second_call_is_a_cache_hit() {
    let engine = engine();
    let result = PhaseResult {
        content: long_text(),
        ..PhaseResult::default()
    };
    let viewport = Viewport::new(320.0, 240.0);

    let first = engine.paginate(TurnId(3), Phase::Yield, &result, viewport);
    let second = engine.paginate(TurnId(3), Phase::Yield, &result, viewport);

    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        engine.stats(),
        PaginationStats {
            hits: 1,
            computations: 1,
            forced_advances: 0,
        }
    );
}

#[test]
fn sub_point_viewport_jitter_shares_cache_entry() {
    let engine = engine();
    let result = PhaseResult {
        content: long_text(),
        ..PhaseResult::default()
    };

    engine.paginate(TurnId(3), Phase::Yield, &result, Viewport::new(320.2, 240.4));
    engine.paginate(TurnId(3), Phase::Yield, &result, Viewport::new(319.8, 239.6));

    assert_eq!(engine.stats().computations, 1);
    assert_eq!(engine.stats().hits, 1);
}

#[test]
fn content_change_misses_and_recomputes() {
    let engine = engine();
    let mut result = PhaseResult {
        content: "first".to_string(),
        ..PhaseResult::default()
    };
    let viewport = Viewport::new(320.0, 240.0);

    engine.paginate(TurnId(9), Phase::Intention, &result, viewport);
    result.content.push_str(" and more");
    let pages = engine.paginate(TurnId(9), Phase::Intention, &result, viewport);

    assert_eq!(pages.concat(), "first and more");
    assert_eq!(engine.stats().computations, 2);
    assert_eq!(engine.stats().hits, 0);
    assert_eq!(engine.cached_entries(), 1);

    assert_eq!(engine.invalidate_turn(TurnId(9)), 1);
    assert_eq!(engine.cached_entries(), 0);
}

#[test]
fn streamed_updates_keep_one_entry_per_slot() {
    let engine = engine();
    let viewport = Viewport::new(320.0, 240.0);
    let mut result = PhaseResult::default();

    for index in 0..500 {
        result.content.push_str(&format!("token{index} "));
        engine.paginate(TurnId(4), Phase::Yield, &result, viewport);
    }

    assert_eq!(engine.cached_entries(), 1);
    assert_eq!(engine.stats().computations, 500);
    let pages = engine.paginate(TurnId(4), Phase::Yield, &result, viewport);
    assert_eq!(pages.concat(), result.content);
    assert_eq!(engine.stats().hits, 1);
}

#[test]
fn degenerate_viewport_counts_forced_advances() {
    let engine = engine();
    let result = PhaseResult {
        content: "abc".to_string(),
        ..PhaseResult::default()
    };

    let pages = engine.paginate(TurnId(2), Phase::Action, &result, Viewport::new(f64::NAN, 10.0));

    assert_eq!(pages.as_ref(), ["a", "b", "c"]);
    assert_eq!(engine.stats().forced_advances, 3);
}

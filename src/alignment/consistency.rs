use crate::error::AlignmentError;
use crate::types::{round_centis, WordTiming};

/// Make word boundaries monotonic, non-overlapping and at least
/// `min_duration` long.
///
/// An overlap is resolved at its rounded midpoint, which also becomes the end
/// of the previous word, unless that would leave the previous word shorter
/// than `min_duration`; then the word starts where the previous one ends.
/// Passes repeat until no previous word is touched. All boundaries come out
/// rounded to centiseconds.
pub fn ensure_increasing_positions(
    words: &mut [WordTiming],
    min_duration: f64,
) -> Result<(), AlignmentError> {
    let max_passes = words.len() + 2;
    if !settle(words, min_duration, max_passes) {
        tracing::warn!(
            passes = max_passes,
            words = words.len(),
            "timestamps: pass budget exhausted before word ends settled"
        );
    }

    let mut previous_end = 0.0;
    for word in words.iter_mut() {
        word.start = round_centis(word.start);
        word.end = round_centis(word.end);
        if !(word.start >= previous_end && word.end > word.start) {
            return Err(AlignmentError::NonMonotonicTimestamps {
                text: word.text.clone(),
                start: word.start,
                end: word.end,
                previous_end,
            });
        }
        previous_end = word.end;
    }
    Ok(())
}

/// Run up to `max_passes` adjustment passes; returns whether a pass left
/// every previous word untouched.
fn settle(words: &mut [WordTiming], min_duration: f64, max_passes: usize) -> bool {
    for pass in 0..max_passes {
        if !adjust_pass(words, min_duration) {
            return true;
        }
        tracing::trace!(pass, "timestamps: previous word ends moved, repeating");
    }
    false
}

/// One forward pass; returns whether a previous word's end was moved.
fn adjust_pass(words: &mut [WordTiming], min_duration: f64) -> bool {
    let mut modified_backward = false;
    let mut previous_end = 0.0;
    for i in 0..words.len() {
        if i > 0 && words[i].start < previous_end {
            let mut new_start = round_centis((previous_end + words[i].start) / 2.0);
            if new_start < words[i - 1].start + min_duration {
                new_start = previous_end;
            } else {
                words[i - 1].end = new_start;
                modified_backward = true;
            }
            words[i].start = new_start;
        }
        let word = &mut words[i];
        if word.end <= word.start + min_duration {
            word.end = word.start + min_duration;
        }
        previous_end = word.end;
    }
    modified_backward
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn w(text: &str, start: f64, end: f64) -> WordTiming {
        WordTiming {
            text: text.to_string(),
            start,
            end,
        }
    }

    fn bounds(words: &[WordTiming]) -> Vec<(f64, f64)> {
        words.iter().map(|w| (w.start, w.end)).collect()
    }

    #[test]
    fn overlap_is_split_at_midpoint() {
        let mut words = vec![w("a", 0.0, 2.0), w("b", 1.5, 3.0)];
        ensure_increasing_positions(&mut words, 0.1).unwrap();
        assert_eq!(bounds(&words), vec![(0.0, 1.75), (1.75, 3.0)]);
    }

    #[test]
    fn midpoint_too_close_to_previous_start_keeps_previous_end() {
        // Midpoint 0.55 would leave "a" 0.05 long.
        let mut words = vec![w("a", 0.5, 0.7), w("b", 0.4, 1.0)];
        ensure_increasing_positions(&mut words, 0.1).unwrap();
        assert_eq!(bounds(&words), vec![(0.5, 0.7), (0.7, 1.0)]);
    }

    #[test]
    fn short_words_are_extended_to_min_duration() {
        let mut words = vec![w("a", 1.0, 1.0), w("b", 1.05, 1.02)];
        ensure_increasing_positions(&mut words, 0.1).unwrap();
        assert_eq!(bounds(&words), vec![(1.0, 1.1), (1.1, 1.2)]);
    }

    #[test]
    fn well_formed_words_are_left_alone() {
        let mut words = vec![w("a", 0.0, 0.5), w("b", 0.5, 1.0), w("c", 1.2, 1.4)];
        let expected = words.clone();
        ensure_increasing_positions(&mut words, 0.1).unwrap();
        assert_eq!(words, expected);
    }

    #[test]
    fn empty_list_is_fine() {
        let mut words: Vec<WordTiming> = Vec::new();
        ensure_increasing_positions(&mut words, 0.1).unwrap();
    }

    #[test]
    fn nan_boundary_is_reported() {
        let mut words = vec![w("a", f64::NAN, 0.5)];
        let err = ensure_increasing_positions(&mut words, 0.1).unwrap_err();
        assert!(matches!(err, AlignmentError::NonMonotonicTimestamps { .. }));
    }

    #[test]
    fn settle_reports_an_exhausted_pass_budget() {
        let overlapping = vec![w("a", 0.0, 2.0), w("b", 1.0, 3.0)];

        let mut words = overlapping.clone();
        assert!(!settle(&mut words, 0.02, 0));
        assert_eq!(words, overlapping);

        // The first pass moves the end of "a"; only a second one sees no change.
        let mut words = overlapping.clone();
        assert!(!settle(&mut words, 0.02, 1));
        assert_eq!(bounds(&words), vec![(0.0, 1.5), (1.5, 3.0)]);

        let mut words = overlapping;
        assert!(settle(&mut words, 0.02, 4));
        assert_eq!(bounds(&words), vec![(0.0, 1.5), (1.5, 3.0)]);
    }

    #[test]
    fn random_word_lists_come_out_monotonic() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let len = rng.gen_range(1..20);
            let min_duration = rng.gen_range(1..=20) as f64 / 100.0;
            let mut words: Vec<WordTiming> = (0..len)
                .map(|i| {
                    let start = rng.gen_range(0.0..10.0);
                    let end = start + rng.gen_range(-0.5..2.0);
                    w(&format!("w{i}"), start, end)
                })
                .collect();
            ensure_increasing_positions(&mut words, min_duration).unwrap();

            let mut previous_end = 0.0;
            for word in &words {
                assert!(word.start >= previous_end, "{words:?}");
                assert!(word.end > word.start, "{words:?}");
                assert_eq!(word.start, round_centis(word.start));
                previous_end = word.end;
            }
        }
    }
}

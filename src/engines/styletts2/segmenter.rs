//! Splitting of unbounded input text into model-sized segments.

/// Default maximum segment length, in characters.
pub const DEFAULT_MAX_SEGMENT_LEN: usize = 125;

/// Split `text` into ordered segments of at most `max_len` characters.
///
/// Each window of `max_len` characters is cut right after its last run of
/// sentence terminators (`.`, `!`, `?`). Without one, the cut falls on the last
/// space, which is dropped. Without a space the window is hard-cut at its
/// boundary. Whitespace following a cut is skipped.
///
/// Lengths are counted in `char`s, so multi-byte text is never split inside a
/// code point. An empty input yields no segments, and a `max_len` of zero is
/// treated as one.
pub fn segment(text: &str, max_len: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let max_len = max_len.max(1);

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let char_len = chars.len();
    if char_len <= max_len {
        return vec![text];
    }

    // Byte offset of the char at `idx`, or the end of the text.
    let byte_at = |idx: usize| chars.get(idx).map_or(text.len(), |&(b, _)| b);

    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < char_len {
        if pos + max_len >= char_len {
            segments.push(&text[byte_at(pos)..]);
            break;
        }

        let window = &chars[pos..pos + max_len];
        let (take, advance) = match last_sentence_end(window) {
            Some(end) => (end, end),
            None => match window.iter().rposition(|&(_, c)| c == ' ') {
                Some(space) if space > 0 => (space, space + 1),
                _ => (max_len, max_len),
            },
        };

        segments.push(&text[byte_at(pos)..byte_at(pos + take)]);
        pos += advance;

        while pos < char_len && chars[pos].1.is_whitespace() {
            pos += 1;
        }
    }

    segments
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Index just past the last run of sentence terminators in `window`.
fn last_sentence_end(window: &[(usize, char)]) -> Option<usize> {
    window
        .iter()
        .rposition(|&(_, c)| is_terminator(c))
        .map(|idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Check that `segments` cover `text` in order, separated only by skipped
    /// whitespace, and return the number of characters skipped.
    fn assert_covers(text: &str, segments: &[&str]) -> usize {
        let mut rest = text;
        let mut skipped = 0;
        for (i, seg) in segments.iter().enumerate() {
            let at = rest
                .find(seg)
                .unwrap_or_else(|| panic!("segment {i} {seg:?} not found in remainder"));
            let gap = &rest[..at];
            assert!(
                gap.chars().all(char::is_whitespace),
                "non-whitespace gap {gap:?} before segment {i}"
            );
            skipped += gap.chars().count();
            rest = &rest[at + seg.len()..];
        }
        assert!(rest.is_empty(), "text not fully covered, left {rest:?}");
        skipped
    }

    #[test]
    fn empty_text_has_no_segments() {
        assert!(segment("", 125).is_empty());
    }

    #[test]
    fn short_text_is_a_single_segment() {
        let text = "Hello there. How are you?";
        assert_eq!(segment(text, 125), vec![text]);
    }

    #[test]
    fn cuts_after_last_sentence_terminator_run() {
        let text = "One two. Three four!! Five six seven eight";
        let segments = segment(text, 25);
        assert_eq!(segments, vec!["One two. Three four!!", "Five six seven eight"]);
    }

    #[test]
    fn falls_back_to_last_space_and_drops_it() {
        let text = "alpha beta gamma delta epsilon";
        let segments = segment(text, 12);
        assert_eq!(segments, vec!["alpha beta", "gamma delta", "epsilon"]);
        assert_covers(text, &segments);
    }

    #[test]
    fn hard_cuts_when_window_has_no_break() {
        let text = "a".repeat(4000);
        let segments = segment(&text, 125);
        assert_eq!(segments.len(), 4000_usize.div_ceil(125));
        assert!(segments.iter().all(|s| s.chars().count() <= 125));
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn skips_whitespace_runs_after_cuts() {
        let text = "First sentence.     Second sentence is here.";
        let segments = segment(text, 20);
        assert_eq!(segments[0], "First sentence.");
        assert!(segments[1].starts_with("Second"));
        assert_eq!(assert_covers(text, &segments), 5 + 1);
    }

    #[test]
    fn leading_space_in_window_is_not_a_cut_point() {
        let text = " abcdefghij";
        let segments = segment(text, 5);
        assert_eq!(segments[0], " abcd");
        assert_covers(text, &segments);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "ünïcödé wörds ärë hërë ånd thërë";
        let segments = segment(text, 10);
        for seg in &segments {
            assert!(seg.chars().count() <= 10);
            assert!(!seg.is_empty());
        }
        assert_covers(text, &segments);
    }

    #[test]
    fn segments_cover_text_and_respect_bound() {
        let samples = [
            "The quick brown fox jumps over the lazy dog. It was not amused! Why? Nobody knows...",
            "no punctuation at all just a long stream of words that keeps going and going",
            "Wordwithoutanyspacesthatisreallyquitelong and then some short words. End.",
            "Mixed\tspacing\n\nwith newlines.  And   tabs!\t\tDone",
            "?!?!?!?!?!?!?!?!?!?!?!",
        ];
        for text in samples {
            for max_len in [1, 3, 7, 16, 40] {
                let segments = segment(text, max_len);
                assert!(!segments.is_empty());
                for seg in &segments {
                    assert!(!seg.is_empty(), "empty segment for {text:?} @ {max_len}");
                    assert!(
                        seg.chars().count() <= max_len,
                        "segment {seg:?} exceeds {max_len}"
                    );
                }
                assert_covers(text, &segments);
            }
        }
    }

    #[test]
    fn zero_max_len_still_makes_progress() {
        let segments = segment("abc", 0);
        assert_eq!(segments, vec!["a", "b", "c"]);
    }
}

//! Splits input text into segments short enough for the synthesis server,
//! preserving original character offsets.
//!
//! Strategy, in order, stopping at the first that satisfies the length cap
//! for every resulting segment: paragraph split, sentence split, then a
//! greedy word-chunking fallback that splits an over-long single token.

use crate::error::{TtsError, TtsResult};
use crate::protocol_constants::{
    MAX_SEGMENT_CHARS, REPETITION_HEURISTIC_MAX_FRACTION, REPETITION_HEURISTIC_MIN_WORDS,
    REPETITION_HEURISTIC_MIN_WORD_LEN,
};

/// What kind of boundary produced a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Paragraph,
    Sentence,
    Chunk,
}

/// A piece of input text ready to be sent to the synthesis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: SegmentKind,
    pub index: usize,
}

/// Splits `text` into segments no longer than `max_len` characters.
///
/// `max_len` is clamped to [`MAX_SEGMENT_CHARS`]. Rejects empty input and
/// input that trips the excessive-repetition heuristic.
pub fn segment(text: &str, max_len: usize) -> TtsResult<Vec<TextSegment>> {
    let max_len = max_len.min(MAX_SEGMENT_CHARS).max(1);

    if text.trim().is_empty() {
        return Err(TtsError::Protocol("input text is empty".into()));
    }
    check_repetition(text)?;

    let paragraphs = split_paragraphs(text);
    if paragraphs.iter().all(|p| p.text.chars().count() <= max_len) {
        return Ok(finalize(paragraphs, SegmentKind::Paragraph, max_len));
    }

    let sentences = split_sentences(text);
    if sentences.iter().all(|s| s.text.chars().count() <= max_len) {
        return Ok(finalize(sentences, SegmentKind::Sentence, max_len));
    }

    Ok(finalize(split_words(text, max_len), SegmentKind::Chunk, max_len))
}

struct RawSpan {
    text: String,
    start_offset: usize,
    end_offset: usize,
}

fn finalize(spans: Vec<RawSpan>, kind: SegmentKind, max_len: usize) -> Vec<TextSegment> {
    // A segmenter pass might still produce one over-long span (e.g. a single
    // paragraph with no sentence punctuation at all); re-chunk those by words.
    let mut out = Vec::new();
    for span in spans {
        if span.text.chars().count() <= max_len {
            out.push((span, kind));
        } else {
            let rechunked = split_words(&span.text, max_len);
            for mut sub in rechunked {
                sub.start_offset += span.start_offset;
                sub.end_offset += span.start_offset;
                out.push((sub, SegmentKind::Chunk));
            }
        }
    }

    out.into_iter()
        .enumerate()
        .map(|(index, (span, kind))| TextSegment {
            text: span.text,
            start_offset: span.start_offset,
            end_offset: span.end_offset,
            kind,
            index,
        })
        .collect()
}

fn split_paragraphs(text: &str) -> Vec<RawSpan> {
    let mut spans = Vec::new();
    let mut offset = 0usize;
    for para in text.split("\n\n") {
        let start = offset;
        let end = start + para.chars().count();
        // account for the "\n\n" separator consumed by split()
        offset = end + 2;
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let trim_start = para.chars().take_while(|c| c.is_whitespace()).count();
        spans.push(RawSpan {
            text: trimmed.to_string(),
            start_offset: start + trim_start,
            end_offset: start + trim_start + trimmed.chars().count(),
        });
    }
    spans
}

fn split_sentences(text: &str) -> Vec<RawSpan> {
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;
    let mut offset = 0usize;

    let chars: Vec<char> = text.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if current.is_empty() {
            current_start = offset;
        }
        current.push(ch);
        offset += 1;

        let is_terminal = matches!(ch, '.' | '!' | '?');
        let next_is_close_quote = chars.get(i + 1).map_or(false, |c| matches!(c, '"' | '\u{201d}' | '\''));
        let boundary_after_quote = next_is_close_quote
            && matches!(chars.get(i + 2), None | Some(' ') | Some('\n'));
        let plain_boundary = is_terminal
            && !next_is_close_quote
            && matches!(chars.get(i + 1), None | Some(' ') | Some('\n'));

        if (is_terminal && plain_boundary) || boundary_after_quote {
            if boundary_after_quote {
                current.push(chars[i + 1]);
                offset += 1;
            }
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                let lead = current.chars().take_while(|c| c.is_whitespace()).count();
                spans.push(RawSpan {
                    text: trimmed.to_string(),
                    start_offset: current_start + lead,
                    end_offset: current_start + lead + trimmed.chars().count(),
                });
            }
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        let trimmed = current.trim();
        let lead = current.chars().take_while(|c| c.is_whitespace()).count();
        spans.push(RawSpan {
            text: trimmed.to_string(),
            start_offset: current_start + lead,
            end_offset: current_start + lead + trimmed.chars().count(),
        });
    }

    spans
}

fn split_words(text: &str, max_len: usize) -> Vec<RawSpan> {
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut current_start: Option<usize> = None;
    let mut offset = 0usize;

    let flush = |current: &mut String, current_start: &mut Option<usize>, spans: &mut Vec<RawSpan>, end: usize| {
        if let Some(start) = current_start.take() {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                spans.push(RawSpan {
                    text: trimmed.to_string(),
                    start_offset: start,
                    end_offset: end,
                });
            }
        }
        current.clear();
    };

    for word in text.split_inclusive(char::is_whitespace) {
        let word_len = word.chars().count();
        let trimmed_word = word.trim_end();

        if word_len > max_len {
            // a single token longer than max_len: flush what we have, then
            // hard-split the token itself.
            flush(&mut current, &mut current_start, &mut spans, offset);
            let mut chunk_start = offset;
            let mut chunk = String::new();
            for ch in trimmed_word.chars() {
                chunk.push(ch);
                if chunk.chars().count() == max_len {
                    spans.push(RawSpan {
                        text: chunk.clone(),
                        start_offset: chunk_start,
                        end_offset: chunk_start + chunk.chars().count(),
                    });
                    chunk_start += chunk.chars().count();
                    chunk.clear();
                }
            }
            if !chunk.is_empty() {
                spans.push(RawSpan {
                    text: chunk.clone(),
                    start_offset: chunk_start,
                    end_offset: chunk_start + chunk.chars().count(),
                });
            }
            offset += word_len;
            continue;
        }

        if current.chars().count() + word_len > max_len {
            flush(&mut current, &mut current_start, &mut spans, offset);
        }
        if current_start.is_none() {
            current_start = Some(offset);
        }
        current.push_str(word);
        offset += word_len;
    }
    flush(&mut current, &mut current_start, &mut spans, offset);

    spans
}

fn check_repetition(text: &str) -> TtsResult<()> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < REPETITION_HEURISTIC_MIN_WORDS {
        return Ok(());
    }

    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut eligible = 0usize;
    for &w in &words {
        if w.chars().count() > REPETITION_HEURISTIC_MIN_WORD_LEN {
            *counts.entry(w).or_insert(0) += 1;
            eligible += 1;
        }
    }
    if eligible == 0 {
        return Ok(());
    }

    if let Some((&word, &count)) = counts.iter().max_by_key(|(_, &c)| c) {
        if count as f64 / eligible as f64 > REPETITION_HEURISTIC_MAX_FRACTION {
            return Err(TtsError::Protocol(format!(
                "input text is dominated by repeated word '{word}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(segment("   ", 100).is_err());
    }

    #[test]
    fn every_segment_respects_max_len() {
        let text = "a ".repeat(2000);
        let segments = segment(&text, 50).unwrap();
        assert!(segments.iter().all(|s| s.text.chars().count() <= 50));
    }

    #[test]
    fn max_len_is_clamped_to_server_cap() {
        let segments = segment("short text", 100_000).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn offsets_reconstruct_source_for_simple_sentences() {
        let text = "Hello there. How are you? I am fine!";
        let segments = segment(text, 1800).unwrap();
        for seg in &segments {
            let slice: String = text.chars().skip(seg.start_offset).take(seg.end_offset - seg.start_offset).collect();
            assert_eq!(slice, seg.text);
        }
    }

    #[test]
    fn segment_count_is_stable_under_repeated_calls() {
        let text = "One. Two. Three. Four.";
        let a = segment(text, 1800).unwrap();
        let b = segment(text, 1800).unwrap();
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn a_segment_of_exactly_max_len_is_accepted_without_further_chunking() {
        let text = "x".repeat(50);
        let segments = segment(&text, 50).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text.chars().count(), 50);
    }

    #[test]
    fn single_overlong_token_is_hard_split() {
        let text = "a".repeat(500);
        let segments = segment(&text, 100).unwrap();
        assert!(segments.iter().all(|s| s.text.chars().count() <= 100));
        assert!(segments.len() >= 5);
    }

    #[test]
    fn excessive_repetition_is_rejected() {
        let text = "spam ".repeat(50);
        assert!(segment(&text, 1800).is_err());
    }
}

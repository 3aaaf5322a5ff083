//! Semantic-boundary text chunker.
//!
//! Splits extracted document text into [`Chunk`]s that respect a configurable
//! `max_chars` limit while carrying `overlap_chars` worth of trailing content
//! into the next chunk's head, so context spanning a boundary is retrievable
//! from either side.
//!
//! The splitting hierarchy is: paragraphs (`\n\n`), then sentences when a
//! paragraph alone exceeds the limit, then word-boundary hard splits when a
//! single sentence exceeds the limit. A hard split never lands mid-word
//! unless one unbroken word is longer than `max_chars`.
//!
//! Chunk text is always a literal slice of the input (`text[start..end]`),
//! which makes chunking fully deterministic: re-chunking unchanged text
//! yields byte-identical boundaries. Re-ingestion dedup depends on this.

use crate::models::Chunk;

/// A minimal semantic unit: a paragraph, sentence, or hard-split piece,
/// identified by its byte span in the source text.
#[derive(Debug, Clone)]
struct Unit {
    start: usize,
    end: usize,
    section: Option<String>,
}

/// Split `text` into chunks of at most `max_chars` bytes, carrying
/// `overlap_chars` of trailing content across boundaries.
///
/// Requires `overlap_chars < max_chars` (enforced at config load). Empty or
/// whitespace-only input yields an empty vector, not an error. Chunk indices
/// are sequential starting at 0.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let units = split_units(text, max_chars);
    if units.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<Unit> = Vec::new();

    for unit in units {
        if !current.is_empty() && unit.end - current[0].start > max_chars {
            // Close the running chunk, then seed the next one with trailing
            // units worth at most `overlap_chars`.
            let closed_end = current.last().map(|u| u.end).unwrap_or(unit.start);
            push_chunk(&mut chunks, text, &current);

            let mut carried: Vec<Unit> = Vec::new();
            for u in current.iter().rev() {
                if closed_end - u.start > overlap_chars {
                    break;
                }
                carried.insert(0, u.clone());
            }
            // The next unit must always fit; shed carried units until it does.
            while !carried.is_empty() && unit.end - carried[0].start > max_chars {
                carried.remove(0);
            }
            current = carried;
        }
        current.push(unit);
    }

    if !current.is_empty() {
        push_chunk(&mut chunks, text, &current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str, units: &[Unit]) {
    let start = units[0].start;
    let end = units.last().unwrap().end;
    chunks.push(Chunk {
        chunk_index: chunks.len() as i64,
        text: text[start..end].to_string(),
        start,
        end,
        section: units[0].section.clone(),
    });
}

/// Produce the flat unit sequence: paragraphs, with oversized paragraphs
/// broken into sentences and oversized sentences hard-split. Every returned
/// unit spans at most `max_chars` bytes.
fn split_units(text: &str, max_chars: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut section: Option<String> = None;

    for (start, end) in paragraph_spans(text) {
        let Some((start, end)) = trim_span(text, start, end) else {
            continue;
        };

        if let Some(title) = heading_title(&text[start..end]) {
            section = Some(title);
        }

        if end - start <= max_chars {
            units.push(Unit {
                start,
                end,
                section: section.clone(),
            });
            continue;
        }

        for (s_start, s_end) in sentence_spans(text, start, end) {
            if s_end - s_start <= max_chars {
                units.push(Unit {
                    start: s_start,
                    end: s_end,
                    section: section.clone(),
                });
            } else {
                for (p_start, p_end) in hard_split_spans(text, s_start, s_end, max_chars) {
                    units.push(Unit {
                        start: p_start,
                        end: p_end,
                        section: section.clone(),
                    });
                }
            }
        }
    }

    units
}

/// Byte spans of paragraphs separated by blank lines.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    for (idx, _) in text.match_indices("\n\n") {
        if idx >= pos {
            spans.push((pos, idx));
        }
        pos = idx + 2;
    }
    if pos <= text.len() {
        spans.push((pos, text.len()));
    }
    spans
}

/// Byte spans of sentences within `text[start..end]`. A sentence ends at
/// `.`, `!`, or `?` followed by whitespace (or end of span), or at a bare
/// newline.
fn sentence_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut sent_start = start;
    let slice = &text[start..end];
    let mut iter = slice.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        let abs = start + i;
        match ch {
            '.' | '!' | '?' => {
                let at_boundary = match iter.peek() {
                    Some((_, next)) => next.is_whitespace(),
                    None => true,
                };
                if at_boundary {
                    let sent_end = abs + ch.len_utf8();
                    if let Some(span) = trim_span(text, sent_start, sent_end) {
                        spans.push(span);
                    }
                    sent_start = sent_end;
                }
            }
            '\n' => {
                if let Some(span) = trim_span(text, sent_start, abs) {
                    spans.push(span);
                }
                sent_start = abs + 1;
            }
            _ => {}
        }
    }

    if let Some(span) = trim_span(text, sent_start, end) {
        spans.push(span);
    }
    spans
}

/// Split an oversized sentence at the word boundary nearest below
/// `max_chars`. Only a single word longer than `max_chars` forces a
/// mid-word cut (at a char boundary).
fn hard_split_spans(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = start;

    while end - pos > max_chars {
        let window_end = floor_char_boundary(text, pos + max_chars);
        let window = &text[pos..window_end];

        let cut = window
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .next_back();

        let (piece_end, next_start) = match cut {
            Some((rel, ws)) if rel > 0 => (pos + rel, pos + rel + ws.len_utf8()),
            _ => (window_end, window_end),
        };

        if let Some(span) = trim_span(text, pos, piece_end) {
            spans.push(span);
        }
        pos = next_start;
    }

    if let Some(span) = trim_span(text, pos, end) {
        spans.push(span);
    }
    spans
}

/// Shrink a span to exclude surrounding whitespace; `None` if nothing
/// remains.
fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed_start = slice.trim_start();
    let lead = slice.len() - trimmed_start.len();
    let trimmed = trimmed_start.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some((start + lead, start + lead + trimmed.len()))
    }
}

/// Extract the title of a Markdown heading paragraph, if it is one.
fn heading_title(paragraph: &str) -> Option<String> {
    if !paragraph.starts_with('#') {
        return None;
    }
    let first_line = paragraph.lines().next().unwrap_or(paragraph);
    let title = first_line.trim_start_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

//! Deterministic text chunking.
//!
//! Splits a document body into [`Chunk`]s under a selectable strategy:
//!
//! - **fixed** — sliding character window of `chunk_size` with `overlap`
//!   characters retained between consecutive windows;
//! - **recursive** — split at paragraph, then sentence, then character
//!   boundaries, merging undersized fragments up to the size budget;
//! - **semantic** — group sentences until a topic shift (word-overlap
//!   similarity heuristic) or the size ceiling.
//!
//! All strategies are deterministic: the same document and config always
//! produce byte-identical chunk boundaries and identifiers. Sizes, spans,
//! and the overlap are measured in characters, not bytes.

use std::collections::BTreeSet;

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::error::ChunkingError;
use crate::models::{Chunk, Document, MetaValue, Metadata};

/// Separator ladder for the recursive strategy, coarsest first.
const SEPARATORS: [&str; 9] = ["\n\n\n", "\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

/// Split a document's body into ordered chunks.
///
/// A blank body yields an empty sequence, not an error. Config is
/// rejected when `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>, ChunkingError> {
    if config.chunk_size == 0 {
        return Err(ChunkingError::InvalidConfig(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if config.overlap >= config.chunk_size {
        return Err(ChunkingError::InvalidConfig(format!(
            "overlap ({}) must be < chunk_size ({})",
            config.overlap, config.chunk_size
        )));
    }

    if doc.body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let map = CharMap::new(&doc.body);
    let ranges = match config.strategy {
        ChunkStrategy::Fixed => fixed_ranges(map.len(), config.chunk_size, config.overlap),
        ChunkStrategy::Recursive => {
            let mut out = Vec::new();
            recursive_ranges(&map, (0, map.len()), 0, config.chunk_size, &mut out);
            out
        }
        ChunkStrategy::Semantic => {
            semantic_ranges(&map, config.chunk_size, config.semantic_threshold)
        }
    };

    let metadata = inherited_metadata(doc);
    let mut chunks = Vec::new();
    for (start, end) in ranges {
        let text = map.slice(start, end);
        // Boundary-seeking strategies can produce pure-whitespace fragments
        // at document edges; those carry nothing worth embedding.
        if config.strategy != ChunkStrategy::Fixed && text.trim().is_empty() {
            continue;
        }
        let ordinal = chunks.len();
        chunks.push(Chunk {
            id: Chunk::make_id(&doc.id, ordinal),
            document_id: doc.id.clone(),
            ordinal,
            span: (start, end),
            text: text.to_string(),
            metadata: metadata.clone(),
            char_len: end - start,
        });
    }

    Ok(chunks)
}

/// Metadata every chunk inherits from its parent document: the parsed
/// frontmatter plus title and tags, so retrieval results are
/// self-describing.
fn inherited_metadata(doc: &Document) -> Metadata {
    let mut metadata = doc.metadata.clone();
    metadata
        .entry("title".to_string())
        .or_insert_with(|| MetaValue::String(doc.title.clone()));
    if !doc.tags.is_empty() {
        metadata
            .entry("tags".to_string())
            .or_insert_with(|| MetaValue::List(doc.tags.iter().cloned().collect()));
    }
    metadata
}

/// Char-indexed view of a string, so spans and window arithmetic work in
/// character units while slicing stays on valid byte boundaries.
struct CharMap<'a> {
    text: &'a str,
    /// Byte offset of each char; one extra entry for the end.
    offsets: Vec<usize>,
}

impl<'a> CharMap<'a> {
    fn new(text: &'a str) -> Self {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self { text, offsets }
    }

    fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    /// Char index of a byte offset known to sit on a char boundary.
    fn char_of_byte(&self, byte: usize) -> usize {
        self.offsets.partition_point(|&o| o < byte)
    }
}

fn fixed_ranges(len: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let stride = chunk_size - overlap;
    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        ranges.push((start, end));
        if end == len {
            break;
        }
        start += stride;
    }
    ranges
}

/// Split `range` into pieces no longer than `max`, preferring the coarsest
/// separator that applies and merging adjacent undersized fragments.
/// Separators stay attached to the preceding piece, so emitted ranges are
/// contiguous.
fn recursive_ranges(
    map: &CharMap,
    range: (usize, usize),
    sep_idx: usize,
    max: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let (start, end) = range;
    if end - start <= max {
        if end > start {
            out.push(range);
        }
        return;
    }

    if sep_idx >= SEPARATORS.len() {
        // No separator left: hard split every `max` chars.
        let mut at = start;
        while at < end {
            let to = (at + max).min(end);
            out.push((at, to));
            at = to;
        }
        return;
    }

    let sep = SEPARATORS[sep_idx];
    let pieces = split_at_separator(map, range, sep);
    if pieces.len() == 1 {
        return recursive_ranges(map, range, sep_idx + 1, max, out);
    }

    // Merge adjacent pieces up to the size budget; oversize pieces recurse
    // with the next, finer separator.
    let mut current: Option<(usize, usize)> = None;
    for piece in pieces {
        let piece_len = piece.1 - piece.0;
        if piece_len > max {
            if let Some(cur) = current.take() {
                out.push(cur);
            }
            recursive_ranges(map, piece, sep_idx + 1, max, out);
            continue;
        }
        match current {
            Some((cur_start, cur_end)) if piece.1 - cur_start <= max && cur_end == piece.0 => {
                current = Some((cur_start, piece.1));
            }
            Some(cur) => {
                out.push(cur);
                current = Some(piece);
            }
            None => current = Some(piece),
        }
    }
    if let Some(cur) = current {
        out.push(cur);
    }
}

/// Split a char range at every occurrence of `sep`, keeping the separator
/// attached to the preceding piece.
fn split_at_separator(map: &CharMap, range: (usize, usize), sep: &str) -> Vec<(usize, usize)> {
    let (start, end) = range;
    let slice = map.slice(start, end);
    let base = map.offsets[start];
    let sep_chars = sep.chars().count();

    let mut pieces = Vec::new();
    let mut piece_start = start;
    for (byte_pos, _) in slice.match_indices(sep) {
        let boundary = map.char_of_byte(base + byte_pos) + sep_chars;
        if boundary > piece_start && boundary <= end {
            pieces.push((piece_start, boundary));
            piece_start = boundary;
        }
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

fn semantic_ranges(map: &CharMap, max: usize, threshold: f32) -> Vec<(usize, usize)> {
    let sentences = sentence_ranges(map);
    let mut out = Vec::new();

    let mut group: Option<(usize, usize)> = None;
    let mut prev_words: BTreeSet<String> = BTreeSet::new();

    for sentence in sentences {
        let sent_len = sentence.1 - sentence.0;
        let words = signature_words(map.slice(sentence.0, sentence.1));

        if sent_len > max {
            // A single oversized sentence: flush and hard-split it.
            if let Some(g) = group.take() {
                out.push(g);
            }
            let mut at = sentence.0;
            while at < sentence.1 {
                let to = (at + max).min(sentence.1);
                out.push((at, to));
                at = to;
            }
            prev_words = words;
            continue;
        }

        match group {
            Some((g_start, g_end)) => {
                let fits = sentence.1 - g_start <= max;
                let related = similarity(&prev_words, &words) >= threshold;
                if fits && related && g_end == sentence.0 {
                    group = Some((g_start, sentence.1));
                } else {
                    out.push((g_start, g_end));
                    group = Some(sentence);
                }
            }
            None => group = Some(sentence),
        }
        prev_words = words;
    }

    if let Some(g) = group {
        out.push(g);
    }
    out
}

/// Sentence segmentation: a sentence ends after terminal punctuation
/// followed by whitespace, or at a blank line. Trailing whitespace belongs
/// to the sentence so ranges stay contiguous.
fn sentence_ranges(map: &CharMap) -> Vec<(usize, usize)> {
    let chars: Vec<char> = map.text.chars().collect();
    let len = chars.len();
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < len {
        let terminal = matches!(chars[i], '.' | '!' | '?')
            && (i + 1 == len || chars[i + 1].is_whitespace());
        let blank_line = chars[i] == '\n' && i + 1 < len && chars[i + 1] == '\n';

        if terminal || blank_line {
            let mut j = i + 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            ranges.push((start, j));
            start = j;
            i = j;
        } else {
            i += 1;
        }
    }

    if start < len {
        ranges.push((start, len));
    }
    ranges
}

/// Topic signature of a sentence: lowercase words of three or more
/// characters.
fn signature_words(sentence: &str) -> BTreeSet<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity between two word sets. Empty sets compare as
/// related, leaving the size budget as the only constraint.
fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

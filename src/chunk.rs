//! Recursive separator-based text chunker.
//!
//! Splits document text into retrieval-sized [`Chunk`]s using a strict
//! priority list of separators (paragraph, line, sentence-terminal
//! punctuation in Latin and CJK forms, space, and finally per-character),
//! then merges the pieces into chunks bounded by `chunk_size` characters
//! with a char-exact `chunk_overlap` carried between adjacent chunks.
//!
//! Splitting keeps each separator attached to the preceding piece, so the
//! pieces of a document concatenate back to its original text and every
//! chunk is an exact substring of it (modulo the overlap seed, which is
//! itself document text). Identical input and configuration always produce
//! an identical chunk sequence.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Document};

/// Separator priority, highest first. The empty string is the last-resort
/// per-character split.
const SEPARATORS: &[&str] = &[
    "\n\n", "\n", ". ", "? ", "! ", "。", "？", "！", " ", "",
];

/// Split documents into overlapping chunks.
///
/// Adjacent chunks from the same document share exactly `chunk_overlap`
/// characters (the tail of one is the head of the next); the overlap resets
/// at document boundaries. Chunks stay within `chunk_size` characters
/// except when a single split piece is longer than
/// `chunk_size - chunk_overlap`, in which case a chunk may exceed the limit
/// by at most `chunk_overlap`. Whitespace-only documents yield no chunks.
pub fn split_documents(
    documents: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in documents {
        if doc.text.trim().is_empty() {
            continue;
        }
        let source_path = doc.source_path.to_string_lossy().to_string();
        let pieces = split_text(&doc.text, SEPARATORS, chunk_size);
        for (index, (offset, text)) in
            merge_pieces(&pieces, chunk_size, chunk_overlap).into_iter().enumerate()
        {
            chunks.push(make_chunk(&source_path, index as i64, offset, &text));
        }
    }
    chunks
}

/// Recursively split `text` into pieces of at most `max_chars` characters,
/// preferring the highest-priority separator that makes progress.
fn split_text(text: &str, separators: &[&str], max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let Some((sep, rest)) = separators.split_first() else {
        return vec![text.to_string()];
    };

    if sep.is_empty() {
        return split_chars(text, max_chars);
    }

    let mut out = Vec::new();
    for part in split_keep_separator(text, sep) {
        if part.chars().count() <= max_chars {
            out.push(part);
        } else {
            out.extend(split_text(&part, rest, max_chars));
        }
    }
    out
}

/// Split on `sep`, keeping the separator attached to the preceding piece so
/// the pieces concatenate back to `text`.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(sep) {
        let end = start + pos + sep.len();
        parts.push(text[start..end].to_string());
        start = end;
    }
    if start < text.len() {
        parts.push(text[start..].to_string());
    }
    parts
}

/// Last-resort split into windows of `max_chars` characters.
fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut n = 0;
    for ch in text.chars() {
        buf.push(ch);
        n += 1;
        if n == max_chars {
            out.push(std::mem::take(&mut buf));
            n = 0;
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Greedily pack pieces into chunks of at most `max_chars` characters,
/// seeding each new chunk with the trailing `overlap` characters of the one
/// just flushed. Returns `(byte_offset, text)` pairs where the offset
/// locates the chunk in the concatenation of the pieces (i.e. the original
/// document text).
fn merge_pieces(pieces: &[String], max_chars: usize, overlap: usize) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;
    let mut current_offset = 0usize;
    let mut pieces_in_current = 0usize;
    let mut pos = 0usize;

    for piece in pieces {
        let piece_chars = piece.chars().count();
        if pieces_in_current > 0 && current_chars + piece_chars > max_chars {
            chunks.push((current_offset, current.clone()));
            let (seed, seed_bytes) = tail_chars(&current, overlap);
            current = seed;
            current_chars = current.chars().count();
            current_offset = pos - seed_bytes;
            pieces_in_current = 0;
        }
        current.push_str(piece);
        current_chars += piece_chars;
        pieces_in_current += 1;
        pos += piece.len();
    }

    if pieces_in_current > 0 {
        chunks.push((current_offset, current));
    }
    chunks
}

/// Return the last `n` characters of `s` and their byte length.
fn tail_chars(s: &str, n: usize) -> (String, usize) {
    if n == 0 {
        return (String::new(), 0);
    }
    let total = s.chars().count();
    if total <= n {
        return (s.to_string(), s.len());
    }
    let byte_idx = s
        .char_indices()
        .nth(total - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    (s[byte_idx..].to_string(), s.len() - byte_idx)
}

fn make_chunk(source_path: &str, index: i64, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source_path: source_path.to_string(),
        chunk_index: index,
        offset,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceFormat;
    use std::path::PathBuf;

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            source_path: PathBuf::from("a.txt"),
            format: SourceFormat::Txt,
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_documents(&[doc("Hello, world!")], 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn whitespace_only_document_yields_no_chunks() {
        assert!(split_documents(&[doc("")], 1000, 200).is_empty());
        assert!(split_documents(&[doc("  \n\n \t ")], 1000, 200).is_empty());
    }

    #[test]
    fn sentence_scenario_with_two_char_overlap() {
        let chunks = split_documents(&[doc("Alpha. Beta. Gamma.")], 10, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Alpha. ");
        assert_eq!(chunks[1].text, ". Beta. ");
        assert_eq!(chunks[2].text, ". Gamma.");
        // trailing two characters of each chunk lead the next one
        assert!(chunks[1].text.starts_with(". "));
        assert!(chunks[0].text.ends_with(". "));
        let alpha = chunks.iter().find(|c| c.text.contains("Alpha")).unwrap();
        assert_eq!(alpha.chunk_index, 0);
    }

    #[test]
    fn overlap_invariant_holds_for_adjacent_chunks() {
        let text = "One two three four five six seven eight nine ten. \
                    Eleven twelve thirteen fourteen fifteen sixteen. \
                    Seventeen eighteen nineteen twenty twenty-one.";
        let overlap = 10;
        let chunks = split_documents(&[doc(text)], 40, overlap);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let a: Vec<char> = pair[0].text.chars().collect();
            let b: Vec<char> = pair[1].text.chars().collect();
            if a.len() >= overlap && b.len() >= overlap {
                assert_eq!(
                    a[a.len() - overlap..],
                    b[..overlap],
                    "overlap mismatch between {:?} and {:?}",
                    pair[0].text,
                    pair[1].text
                );
            }
        }
    }

    #[test]
    fn chunks_stay_within_size_limit() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. \
                    Ut enim ad minim veniam, quis nostrud exercitation ullamco.";
        let size = 50;
        let overlap = 10;
        let chunks = split_documents(&[doc(text)], size, overlap);
        for c in &chunks {
            assert!(
                c.text.chars().count() <= size + overlap,
                "chunk too large: {:?}",
                c.text
            );
        }
    }

    #[test]
    fn hard_split_without_separators() {
        let text = "a".repeat(25);
        let chunks = split_documents(&[doc(&text)], 10, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 10);
        assert!(chunks[1].text.starts_with("aa"));
        let rebuilt: usize = chunks.iter().map(|c| c.text.len()).sum();
        // 25 original chars plus one 2-char seed per boundary
        assert_eq!(rebuilt, 25 + 2 * (chunks.len() - 1));
    }

    #[test]
    fn cjk_sentences_split_on_fullwidth_punctuation() {
        let text = "这是第一句话。这是第二句话。这是第三句话。";
        let chunks = split_documents(&[doc(text)], 8, 2);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 10);
        }
        // no panics on multibyte boundaries and the text survives
        assert!(chunks.iter().any(|c| c.text.contains("第一句")));
        assert!(chunks.iter().any(|c| c.text.contains("第三句")));
    }

    #[test]
    fn offsets_locate_chunks_in_source_text() {
        let text = "First paragraph here.\n\nSecond paragraph follows.\n\nThird one ends.";
        let chunks = split_documents(&[doc(text)], 30, 5);
        for c in &chunks {
            let slice = &text[c.offset..c.offset + c.text.len()];
            assert_eq!(slice, c.text, "offset {} wrong for {:?}", c.offset, c.text);
        }
    }

    #[test]
    fn deterministic_output() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta. Epsilon. Zeta one two three.";
        let a = split_documents(&[doc(text)], 20, 4);
        let b = split_documents(&[doc(text)], 20, 4);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.offset, y.offset);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }

    #[test]
    fn indices_are_per_document_and_contiguous() {
        let d1 = doc(&"one two three four five six. ".repeat(5));
        let mut d2 = doc(&"seven eight nine ten eleven. ".repeat(5));
        d2.source_path = PathBuf::from("b.txt");
        let chunks = split_documents(&[d1, d2], 40, 8);
        for source in ["a.txt", "b.txt"] {
            let per_doc: Vec<_> = chunks.iter().filter(|c| c.source_path == source).collect();
            assert!(!per_doc.is_empty());
            for (i, c) in per_doc.iter().enumerate() {
                assert_eq!(c.chunk_index, i as i64);
            }
        }
    }

    #[test]
    fn overlap_does_not_cross_document_boundaries() {
        let d1 = doc(&"alpha beta gamma delta epsilon zeta eta theta. ".repeat(3));
        let mut d2 = doc("short second document");
        d2.source_path = PathBuf::from("b.txt");
        let chunks = split_documents(&[d1, d2], 30, 6);
        let first_of_b = chunks
            .iter()
            .find(|c| c.source_path == "b.txt")
            .unwrap();
        assert_eq!(first_of_b.offset, 0);
        assert!(first_of_b.text.starts_with("short"));
    }
}

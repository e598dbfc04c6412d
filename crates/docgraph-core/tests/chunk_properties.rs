//! Property-based tests for the chunker.

use proptest::prelude::*;

use docgraph_core::chunk::{Chunker, ChunkingOptions, TextChunk};

fn body_strategy() -> impl Strategy<Value = String> {
    // Words, spaces, newlines and blank lines, with some multibyte text mixed in.
    prop::collection::vec(
        prop_oneof![
            4 => "[a-z]{1,12}",
            2 => Just(" ".to_string()),
            1 => Just("\n".to_string()),
            1 => Just("\n\n".to_string()),
            1 => "[äöüé日本]{1,4}",
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

fn options_strategy() -> impl Strategy<Value = ChunkingOptions> {
    (1i64..200, any::<bool>(), 0i64..60)
        .prop_flat_map(|(size, paragraphs, min)| (Just(size), 0..size, Just(paragraphs), Just(min)))
        .prop_map(|(size, overlap, paragraphs, min)| {
            ChunkingOptions::new(size, overlap, paragraphs, min).unwrap()
        })
}

fn assert_cover(body: &str, chunks: &[TextChunk]) -> Result<(), TestCaseError> {
    prop_assert!(!chunks.is_empty());
    prop_assert_eq!(chunks[0].start_offset, 0);
    prop_assert_eq!(chunks[chunks.len() - 1].end_offset, body.len());
    for (i, c) in chunks.iter().enumerate() {
        prop_assert_eq!(c.index, i);
        prop_assert!(c.start_offset <= c.end_offset);
        prop_assert_eq!(c.content.as_str(), &body[c.start_offset..c.end_offset]);
    }
    for pair in chunks.windows(2) {
        prop_assert!(pair[1].start_offset >= pair[0].start_offset);
        prop_assert!(
            pair[1].start_offset <= pair[0].end_offset,
            "gap between {:?} and {:?}",
            (pair[0].start_offset, pair[0].end_offset),
            (pair[1].start_offset, pair[1].end_offset)
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn chunks_cover_body_without_gaps(body in body_strategy(), options in options_strategy()) {
        let chunks = Chunker::new(options).chunk(&body);
        assert_cover(&body, &chunks)?;
    }

    #[test]
    fn short_body_is_single_identical_chunk(body in "[a-z \n]{0,80}", extra in 0i64..50) {
        let size = body.len() as i64 + extra + 1;
        let options = ChunkingOptions::new(size, 0, true, 10).unwrap();
        let chunks = Chunker::new(options).chunk(&body);
        prop_assert_eq!(chunks.len(), 1);
        prop_assert_eq!(&chunks[0].content, &body);
    }

    #[test]
    fn chunking_is_deterministic(body in body_strategy(), options in options_strategy()) {
        let chunker = Chunker::new(options);
        prop_assert_eq!(chunker.chunk(&body), chunker.chunk(&body));
    }

    #[test]
    fn merging_never_adds_chunks(
        body in body_strategy(),
        size in 10i64..120,
        paragraphs in any::<bool>(),
        min in 1i64..80,
    ) {
        let overlap = size / 4;
        let unmerged = Chunker::new(ChunkingOptions::new(size, overlap, paragraphs, 0).unwrap()).chunk(&body);
        let merged = Chunker::new(ChunkingOptions::new(size, overlap, paragraphs, min).unwrap()).chunk(&body);
        prop_assert!(merged.len() <= unmerged.len());
        assert_cover(&body, &merged)?;
    }

    #[test]
    fn fixed_windows_respect_chunk_size(body in "[a-z \n]{0,600}", size in 1i64..100, overlap_pct in 0i64..100) {
        let overlap = (size * overlap_pct / 100).min(size - 1);
        let options = ChunkingOptions::new(size, overlap, false, 0).unwrap();
        for c in Chunker::new(options).chunk(&body) {
            prop_assert!(c.content.len() <= size as usize);
        }
    }

    #[test]
    fn options_validation_matches_rules(size in -5i64..50, overlap in -5i64..60, min in -5i64..5) {
        let valid = size > 0 && overlap >= 0 && overlap < size && min >= 0;
        prop_assert_eq!(ChunkingOptions::new(size, overlap, true, min).is_ok(), valid);
    }
}

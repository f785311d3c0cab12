use super::estimate_token_count as estimate_token_count_impl;
use super::*;

fn long_text() -> String {
    let mut text = String::new();
    for paragraph in 0..12 {
        for sentence in 0..8 {
            text.push_str(&format!(
                "Paragraph {} sentence {} talks about irrigation schedules for orchards. ",
                paragraph, sentence
            ));
        }
        text.push_str("\n\n");
    }
    text
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn empty_text_yields_no_chunks() {
    let chunks = chunk_text("   \n\n  ", &ChunkingConfig::default()).expect("chunking succeeds");
    assert!(chunks.is_empty());
}

#[test]
fn small_text_is_single_chunk() {
    let text = "The capital of Freedonia is Lostcity.";
    let chunks = chunk_text(text, &ChunkingConfig::default()).expect("chunking succeeds");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
    assert_eq!(chunks[0].chunk_index, 0);
}

#[test]
fn large_text_respects_chunk_size() {
    let config = ChunkingConfig {
        chunk_size: 64,
        chunk_overlap: 8,
    };
    let chunks = chunk_text(&long_text(), &config).expect("chunking succeeds");

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        // Overlap words are estimated at 0.75 words per token, so allow a small margin
        assert!(
            chunk.token_count <= config.chunk_size + 4,
            "chunk {} has {} tokens",
            chunk.chunk_index,
            chunk.token_count
        );
    }
}

#[test]
fn chunk_indices_are_sequential() {
    let config = ChunkingConfig {
        chunk_size: 64,
        chunk_overlap: 0,
    };
    let chunks = chunk_text(&long_text(), &config).expect("chunking succeeds");

    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
    }
}

#[test]
fn overlap_repeats_previous_tail() {
    let config = ChunkingConfig {
        chunk_size: 64,
        chunk_overlap: 8,
    };
    let without_overlap = chunk_text(
        &long_text(),
        &ChunkingConfig {
            chunk_overlap: 0,
            ..config.clone()
        },
    )
    .expect("chunking succeeds");
    let with_overlap = chunk_text(&long_text(), &config).expect("chunking succeeds");

    assert!(with_overlap.len() > 1);
    let previous_words: Vec<&str> = with_overlap[0].text.split_whitespace().collect();
    let tail = previous_words[previous_words.len() - 6..].join(" ");
    assert!(with_overlap[1].text.starts_with(&tail));
    assert!(without_overlap.iter().all(|c| !c.text.is_empty()));
}

#[test]
fn oversized_sentence_falls_back_to_words() {
    let config = ChunkingConfig {
        chunk_size: 40,
        chunk_overlap: 0,
    };
    let text = "word ".repeat(400);
    let chunks = chunk_text(&text, &config).expect("chunking succeeds");

    assert!(chunks.len() > 5);
    assert!(chunks.iter().all(|c| c.token_count <= config.chunk_size));
}

#[test]
fn sentence_boundaries_keep_punctuation() {
    let found = sentences("First one. Second one! Third one? Tail").expect("sentences split");
    assert_eq!(found, vec!["First one.", "Second one!", "Third one?", "Tail"]);
}

#[test]
fn overlap_text_extraction() {
    assert_eq!(extract_overlap_text("a b c d e f g h i j", 4), "h i j");
    assert_eq!(extract_overlap_text("a b", 8), "");
    assert_eq!(extract_overlap_text("a b c", 0), "");
}

use tracing::debug;

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
}

/// Overlapping character-window splitter. Cuts snap back to the last
/// sentence or line boundary inside the window, but only when that boundary
/// lies past half the target width; fragments shorter than `min_chars`
/// after trimming are discarded.
pub struct ChunkSplitter {
    target: usize,
    overlap: usize,
    min_chars: usize,
}

impl ChunkSplitter {
    pub fn new(target: usize, overlap: usize, min_chars: usize) -> Self {
        let target = target.max(1);
        Self {
            target,
            overlap: overlap.min(target.saturating_sub(1)),
            min_chars,
        }
    }

    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut contents = Vec::new();
        let mut start = 0usize;

        while start < total {
            let hard_end = (start + self.target).min(total);
            let end = if hard_end < total {
                self.snap(&chars, start, hard_end)
            } else {
                hard_end
            };

            let content: String = chars[start..end].iter().collect();
            let trimmed = content.trim();
            if trimmed.chars().count() >= self.min_chars {
                contents.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        debug!("Split {} chars into {} chunks", total, contents.len());
        contents
            .into_iter()
            .enumerate()
            .map(|(index, content)| TextChunk { index, content })
            .collect()
    }

    /// Walk back from the hard cut looking for a boundary in the second half
    /// of the window.
    fn snap(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_cut = start + self.target / 2;
        let mut i = hard_end;
        while i > min_cut {
            if matches!(chars[i - 1], '\n' | '.' | '!' | '?') {
                return i;
            }
            i -= 1;
        }
        hard_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> ChunkSplitter {
        ChunkSplitter::new(1000, 200, 50)
    }

    #[test]
    fn test_empty_text_produces_no_chunks() {
        assert!(splitter().split("").is_empty());
        assert!(splitter().split("   \n  ").is_empty());
    }

    #[test]
    fn test_short_fragments_are_discarded() {
        assert!(splitter().split("too short").is_empty());
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let text = "a".repeat(300);
        let chunks = splitter().split(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content.len(), 300);
    }

    #[test]
    fn test_unbroken_text_cuts_at_target_with_overlap() {
        let text = "a".repeat(2500);
        let chunks = splitter().split(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.len(), 1000);
        assert_eq!(chunks[1].content.len(), 1000);
        // third window starts at 1600 and runs to the end
        assert_eq!(chunks[2].content.len(), 900);
    }

    #[test]
    fn test_cut_snaps_to_sentence_boundary_past_half_window() {
        // One sentence ends at position 700, inside the back half of the
        // first 1000-char window.
        let mut text = "b".repeat(699);
        text.push('.');
        text.push_str(&"c".repeat(900));
        let chunks = splitter().split(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.ends_with('.'));
        assert_eq!(chunks[0].content.len(), 700);
    }

    #[test]
    fn test_boundary_before_half_window_is_ignored() {
        // The only sentence boundary sits at position 300; the cut stays at
        // the hard window edge.
        let mut text = "d".repeat(299);
        text.push('.');
        text.push_str(&"e".repeat(1200));
        let chunks = splitter().split(&text);
        assert_eq!(chunks[0].content.len(), 1000);
    }

    #[test]
    fn test_line_boundary_counts_too() {
        let mut text = "f".repeat(800);
        text.push('\n');
        text.push_str(&"g".repeat(700));
        let chunks = splitter().split(&text);
        // trailing newline is trimmed from the stored content
        assert_eq!(chunks[0].content.len(), 800);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "h".repeat(1800);
        let chunks = splitter().split(&text);
        assert_eq!(chunks.len(), 2);
        // second window starts 200 chars before the first cut
        let tail: String = chunks[0].content.chars().rev().take(200).collect();
        let head: String = chunks[1].content.chars().take(200).collect();
        assert_eq!(tail.chars().rev().collect::<String>(), head);
    }
}

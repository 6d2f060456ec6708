//! Fixed-size grapheme windows.

use super::{trimmed, PageSplitter};
use unicode_segmentation::UnicodeSegmentation;

/// Windows of `size` graphemes starting every `size - overlap` graphemes.
///
/// A window that would end mid-word is pulled back to the last whitespace
/// that still reaches the next window's start, so consecutive windows never
/// leave a gap and overlap by at most `overlap` graphemes. The number of
/// windows is at most `ceil(graphemes / (size - overlap))`.
pub struct WindowSplitter {
    size: usize,
    step: usize,
}

impl WindowSplitter {
    /// Callers guarantee `overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size,
            step: size.saturating_sub(overlap).max(1),
        }
    }
}

impl PageSplitter for WindowSplitter {
    fn split<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let graphemes: Vec<(usize, &str)> = text.grapheme_indices(true).collect();
        let total = graphemes.len();
        let byte_at = |i: usize| graphemes.get(i).map(|(b, _)| *b).unwrap_or(text.len());

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < total {
            let end = (start + self.size).min(total);
            let mut cut = end;

            if end < total {
                if let Some(ws) = (start + self.step..end)
                    .rev()
                    .find(|&i| graphemes[i].1.chars().all(char::is_whitespace))
                {
                    cut = ws;
                }
            }

            let from = byte_at(start);
            if let Some(piece) = trimmed(from, &text[from..byte_at(cut)]) {
                pieces.push(piece);
            }

            if cut >= total {
                break;
            }
            start += self.step;
        }

        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers(text: &str, pieces: &[(usize, &str)]) -> bool {
        let mut reached = 0;
        for (offset, piece) in pieces {
            if *offset > reached && !text[reached..*offset].trim().is_empty() {
                return false;
            }
            reached = reached.max(offset + piece.len());
        }
        text[reached..].trim().is_empty()
    }

    #[test]
    fn test_window_count_bound() {
        for (size, overlap) in [(10, 0), (10, 3), (10, 9), (7, 2)] {
            let splitter = WindowSplitter::new(size, overlap);
            for len in [1usize, 9, 10, 11, 57, 100] {
                let text = "x".repeat(len);
                let pieces = splitter.split(&text);
                let bound = len.div_ceil(size - overlap);
                assert!(
                    pieces.len() <= bound,
                    "size {} overlap {} len {}: {} > {}",
                    size,
                    overlap,
                    len,
                    pieces.len(),
                    bound
                );
                assert!(covers(&text, &pieces));
            }
        }
    }

    #[test]
    fn test_windows_break_on_whitespace() {
        let splitter = WindowSplitter::new(12, 4);
        let text = "alpha beta gamma delta epsilon zeta";
        let pieces = splitter.split(text);

        assert!(covers(text, &pieces));
        for (offset, piece) in &pieces {
            assert_eq!(&text[*offset..offset + piece.len()], *piece);
            assert!(piece.chars().count() <= 12);
        }
        assert!(pieces[0].1.ends_with("beta") || pieces[0].1.ends_with("alpha"));
    }

    #[test]
    fn test_graphemes_never_split() {
        let splitter = WindowSplitter::new(5, 1);
        let text = "🎮🎮🎮🎮🎮🎮🎮🎮 e\u{301}e\u{301}e\u{301}";
        for (offset, piece) in splitter.split(text) {
            assert!(text.is_char_boundary(offset));
            assert!(text.is_char_boundary(offset + piece.len()));
            assert!(!piece.starts_with('\u{301}'));
        }
    }
}

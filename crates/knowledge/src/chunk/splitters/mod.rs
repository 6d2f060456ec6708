//! Page splitting strategies.

mod semantic;
mod window;

pub use semantic::SemanticSplitter;
pub use window::WindowSplitter;

/// Cuts one page of text into trimmed, non-empty pieces.
pub trait PageSplitter: Send + Sync {
    /// Returns `(byte_offset, piece)` pairs in document order, where
    /// `piece == &text[byte_offset..byte_offset + piece.len()]`.
    fn split<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)>;
}

/// Trim `raw` (found at `offset`) and re-anchor the offset.
pub(crate) fn trimmed(offset: usize, raw: &str) -> Option<(usize, &str)> {
    let leading = raw.len() - raw.trim_start().len();
    let piece = raw.trim();
    if piece.is_empty() {
        None
    } else {
        Some((offset + leading, piece))
    }
}

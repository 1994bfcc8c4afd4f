//! Caption buffers for telephony persistence.
//!
//! On the phone leg, transcript fragments arrive from the provider in
//! overlapping pieces. Captions are only used when writing turn
//! records, so the merge rule favors the longest coherent text over
//! strict ordering: supersets replace, subsets are dropped, and
//! anything else is appended.

/// Merges an incoming fragment into an existing caption buffer.
pub fn merge_caption(buffer: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        return buffer.to_string();
    }
    if buffer.is_empty() {
        return fragment.to_string();
    }
    // Fragment extends the buffer at either end: replace.
    if fragment.starts_with(buffer) || fragment.ends_with(buffer) {
        return fragment.to_string();
    }
    // Fragment is already contained at either end: keep the buffer.
    if buffer.starts_with(fragment) || buffer.ends_with(fragment) {
        return buffer.to_string();
    }
    if buffer.ends_with(char::is_whitespace) || fragment.starts_with(char::is_whitespace) {
        format!("{buffer}{fragment}")
    } else {
        format!("{buffer} {fragment}")
    }
}

/// An accumulating caption for one speaker, flushed into a turn record
/// at turn boundaries and at call finalization.
#[derive(Debug, Default)]
pub struct CaptionBuffer {
    text: String,
}

impl CaptionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        self.text = merge_caption(&self.text, fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Takes the trimmed caption text and clears the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extension_replaces() {
        assert_eq!(merge_caption("hello wor", "hello world"), "hello world");
    }

    #[test]
    fn test_suffix_extension_replaces() {
        assert_eq!(merge_caption("world", "hello world"), "hello world");
    }

    #[test]
    fn test_subset_keeps_buffer() {
        assert_eq!(merge_caption("hello world", "hello"), "hello world");
        assert_eq!(merge_caption("hello world", "world"), "hello world");
    }

    #[test]
    fn test_disjoint_appends_with_space() {
        assert_eq!(merge_caption("hello", "world"), "hello world");
    }

    #[test]
    fn test_existing_whitespace_is_not_doubled() {
        assert_eq!(merge_caption("hello ", "world"), "hello world");
        assert_eq!(merge_caption("hello", " world"), "hello world");
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(merge_caption("", "hi"), "hi");
        assert_eq!(merge_caption("hi", ""), "hi");
        assert_eq!(merge_caption("", ""), "");
    }

    #[test]
    fn test_buffer_take_clears() {
        let mut buf = CaptionBuffer::new();
        buf.push("good ");
        buf.push("morning");
        assert_eq!(buf.take(), "good morning");
        assert!(buf.is_empty());
    }
}

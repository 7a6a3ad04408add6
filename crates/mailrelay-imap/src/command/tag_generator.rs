//! IMAP command tag generator.
//!
//! Tags are used to match commands with their responses.

/// Tag generator for IMAP commands.
///
/// Generates sequential tags in the format "A0000", "A0001", etc. The
/// counter wraps around instead of overflowing; a session never comes close
/// to having that many commands in flight.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        let n = self.counter;
        self.counter = self.counter.wrapping_add(1);
        format!("{}{:04}", self.prefix, n)
    }

    /// Returns the number of tags handed out so far.
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.counter
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_generation() {
        let mut generator = TagGenerator::default();
        assert_eq!(generator.next_tag(), "A0000");
        assert_eq!(generator.next_tag(), "A0001");
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn test_custom_prefix_and_padding() {
        let mut generator = TagGenerator::new('R');
        for _ in 0..100 {
            let _ = generator.next_tag();
        }
        assert_eq!(generator.next_tag(), "R0100");
    }

    #[test]
    fn test_wraps_instead_of_panicking() {
        let mut generator = TagGenerator::default();
        generator.counter = u32::MAX;
        let _ = generator.next_tag();
        assert_eq!(generator.next_tag(), "A0000");
    }
}

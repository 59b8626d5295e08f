//! Keyword matching with a lazily compiled pattern cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// How a keyword is matched against message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeywordOptions {
    /// Match case exactly. Off by default.
    pub case_sensitive: bool,
    /// Require word boundaries on both sides. On by default.
    pub whole_word: bool,
}

impl Default for KeywordOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            whole_word: true,
        }
    }
}

impl KeywordOptions {
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn whole_word(mut self, whole_word: bool) -> Self {
        self.whole_word = whole_word;
        self
    }
}

/// Identity of a keyword hook: the keyword plus its match options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordKey {
    pub keyword: String,
    pub case_sensitive: bool,
    pub whole_word: bool,
}

impl KeywordKey {
    pub fn new(keyword: impl Into<String>, options: KeywordOptions) -> Self {
        Self {
            keyword: keyword.into(),
            case_sensitive: options.case_sensitive,
            whole_word: options.whole_word,
        }
    }

    /// Builds the pattern for this key. The keyword is matched literally.
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        let escaped = regex::escape(&self.keyword);
        let pattern = if self.whole_word {
            format!(r"\b{escaped}\b")
        } else {
            escaped
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(!self.case_sensitive)
            .build()
    }
}

impl fmt::Display for KeywordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (case_sensitive={}, whole_word={})",
            self.keyword, self.case_sensitive, self.whole_word
        )
    }
}

/// Compiled patterns keyed by [`KeywordKey`].
///
/// Patterns are built on first use and kept until their hook is removed.
#[derive(Default)]
pub struct PatternCache {
    patterns: Mutex<HashMap<KeywordKey, Arc<Regex>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` matches somewhere in `text`.
    pub fn is_match(&self, key: &KeywordKey, text: &str) -> bool {
        self.pattern(key).is_some_and(|regex| regex.is_match(text))
    }

    fn pattern(&self, key: &KeywordKey) -> Option<Arc<Regex>> {
        let mut patterns = self.patterns.lock();
        if let Some(regex) = patterns.get(key) {
            return Some(Arc::clone(regex));
        }
        match key.compile() {
            Ok(regex) => {
                let regex = Arc::new(regex);
                patterns.insert(key.clone(), Arc::clone(&regex));
                Some(regex)
            }
            Err(e) => {
                warn!(keyword = %key, error = %e, "Keyword pattern failed to compile");
                None
            }
        }
    }

    /// Drops the compiled pattern for `key`.
    pub fn evict(&self, key: &KeywordKey) {
        self.patterns.lock().remove(key);
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_word_default() {
        let cache = PatternCache::new();
        let key = KeywordKey::new("cat", KeywordOptions::default());

        assert!(cache.is_match(&key, "I have a cat."));
        assert!(cache.is_match(&key, "CAT!"));
        assert!(!cache.is_match(&key, "concatenate"));
    }

    #[test]
    fn test_substring_match() {
        let cache = PatternCache::new();
        let key = KeywordKey::new("cat", KeywordOptions::default().whole_word(false));
        assert!(cache.is_match(&key, "concatenate"));
    }

    #[test]
    fn test_case_sensitive() {
        let cache = PatternCache::new();
        let key = KeywordKey::new("Rust", KeywordOptions::default().case_sensitive(true));
        assert!(cache.is_match(&key, "I like Rust"));
        assert!(!cache.is_match(&key, "I like rust"));
    }

    #[test]
    fn test_keyword_is_literal() {
        let cache = PatternCache::new();
        let key = KeywordKey::new("c++", KeywordOptions::default().whole_word(false));
        assert!(cache.is_match(&key, "learning c++ today"));
        assert!(!cache.is_match(&key, "learning cc today"));
    }

    #[test]
    fn test_patterns_are_cached_per_key() {
        let cache = PatternCache::new();
        let whole = KeywordKey::new("cat", KeywordOptions::default());
        let partial = KeywordKey::new("cat", KeywordOptions::default().whole_word(false));

        cache.is_match(&whole, "cat");
        cache.is_match(&whole, "cat");
        cache.is_match(&partial, "cat");
        assert_eq!(cache.len(), 2);

        cache.evict(&whole);
        assert_eq!(cache.len(), 1);
    }
}

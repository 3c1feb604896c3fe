//! Token weight estimation for batch planning
//!
//! Counters must be deterministic: the same text always yields the same
//! weight, so a file is planned into the same batches on every run.

use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn name(&self) -> &str;
}

/// Character-based estimate, `ceil(chars / chars_per_token)`
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    chars_per_token: usize,
}

impl ApproxTokenCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars + self.chars_per_token - 1) / self.chars_per_token
    }

    fn name(&self) -> &str {
        "approx"
    }
}

/// Whitespace-separated words
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenCounter;

impl TokenCounter for WordTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn name(&self) -> &str {
        "words"
    }
}

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("Failed to load tokenizer from {path}: {message}")]
    Load { path: String, message: String },
}

/// Exact counts from a Hugging Face `tokenizer.json`
pub struct TokenizerCounter {
    tokenizer: tokenizers::Tokenizer,
    fallback: ApproxTokenCounter,
}

impl TokenizerCounter {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let tokenizer =
            tokenizers::Tokenizer::from_file(path).map_err(|e| TokenizerError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            tokenizer,
            fallback: ApproxTokenCounter::default(),
        })
    }
}

impl TokenCounter for TokenizerCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                warn!(error = %e, "Tokenizer failed, using character estimate");
                self.fallback.count(text)
            }
        }
    }

    fn name(&self) -> &str {
        "tokenizer"
    }
}

impl std::fmt::Debug for TokenizerCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerCounter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_rounds_up() {
        let counter = ApproxTokenCounter::default();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abc"), 1);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn test_approx_is_monotonic_in_length() {
        let counter = ApproxTokenCounter::default();
        let mut previous = 0;
        for len in 0..64 {
            let weight = counter.count(&"x".repeat(len));
            assert!(weight >= previous);
            previous = weight;
        }
    }

    #[test]
    fn test_zero_chars_per_token_is_clamped() {
        let counter = ApproxTokenCounter::new(0);
        assert_eq!(counter.count("abc"), 3);
    }

    #[test]
    fn test_word_counter() {
        assert_eq!(WordTokenCounter.count("SELECT a, b\n  FROM t"), 5);
        assert_eq!(WordTokenCounter.count("   "), 0);
    }

    #[test]
    fn test_tokenizer_missing_file() {
        let result = TokenizerCounter::from_file("/nonexistent/tokenizer.json");
        assert!(matches!(result, Err(TokenizerError::Load { .. })));
    }
}

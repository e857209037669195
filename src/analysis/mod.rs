//! Full-text analysis shared by indexing and query compilation

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::AnalyzerConfig;

/// Splits text into searchable tokens
///
/// Tokens are unicode words, optionally lowercased, filtered by length.
/// No stemming and no stopwords: a query term matches only the same word.
#[derive(Clone, Debug)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Tokenize text into a vector of terms, in order
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|word| {
                if self.config.lowercase {
                    word.to_lowercase()
                } else {
                    word.to_string()
                }
            })
            .filter(|token| {
                let len = token.chars().count();
                len >= self.config.min_token_length && len <= self.config.max_token_length
            })
            .collect()
    }

    /// Get unique terms from text
    pub fn unique_terms(&self, text: &str) -> HashSet<String> {
        self.tokenize(text).into_iter().collect()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

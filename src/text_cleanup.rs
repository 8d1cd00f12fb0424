// Text cleanup module
// Applies regex patterns to clean up track/album/artist names

use crate::config::CleanupConfig;
use regex::Regex;

/// Strips configured patterns from names before they are fingerprinted
pub struct TextCleaner {
    /// `None` leaves text untouched
    patterns: Option<Vec<Regex>>,
}

impl TextCleaner {
    /// Compile the configured patterns, skipping any that do not parse
    pub fn new(config: &CleanupConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut patterns = Vec::with_capacity(config.patterns.len());
        for pattern in &config.patterns {
            match Regex::new(pattern) {
                Ok(re) => patterns.push(re),
                Err(e) => log::warn!("Skipping cleanup pattern '{}': {}", pattern, e),
            }
        }
        log::debug!("Loaded {} cleanup patterns", patterns.len());

        Self {
            patterns: Some(patterns),
        }
    }

    pub fn disabled() -> Self {
        Self { patterns: None }
    }

    /// Remove every pattern match, then trim
    pub fn clean(&self, text: &str) -> String {
        let Some(patterns) = &self.patterns else {
            return text.to_string();
        };

        patterns
            .iter()
            .fold(text.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
            .trim()
            .to_string()
    }

    /// Clean every entry of an artist list, dropping entries left empty
    pub fn clean_list(&self, items: Vec<String>) -> Vec<String> {
        if self.patterns.is_none() {
            return items;
        }
        items
            .iter()
            .map(|item| self.clean(item))
            .filter(|item| !item.is_empty())
            .collect()
    }
}

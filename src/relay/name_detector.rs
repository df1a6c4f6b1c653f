use regex::Regex;

use super::language::Language;

/// Self-introduction patterns, checked in order
const NAME_PATTERNS: &[(&str, Language)] = &[
    (r"(?i)\bmy name is\s+(\w+)", Language::En),
    (r"(?i)\bi'?m called\s+(\w+)", Language::En),
    (r"(?i)\bme llamo\s+(\w+)", Language::Es),
    (r"(?i)\bmi nombre es\s+(\w+)", Language::Es),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedName {
    pub name: String,
    pub language: Language,
}

#[derive(Debug, Clone)]
struct NamePattern {
    regex: Regex,
    language: Language,
}

/// Extracts a self-introduced name from a user message
#[derive(Debug, Clone)]
pub struct NameDetector {
    patterns: Vec<NamePattern>,
}

impl NameDetector {
    pub fn new() -> Self {
        let patterns = NAME_PATTERNS
            .iter()
            .filter_map(|(p, language)| {
                Regex::new(p).ok().map(|regex| NamePattern {
                    regex,
                    language: *language,
                })
            })
            .collect();

        Self { patterns }
    }

    /// Add a locale pattern after the built-in ones; the name is capture group 1
    pub fn with_pattern(mut self, regex: Regex, language: Language) -> Self {
        self.patterns.push(NamePattern { regex, language });
        self
    }

    pub fn detect(&self, text: &str) -> Option<DetectedName> {
        self.patterns.iter().find_map(|pattern| {
            let caps = pattern.regex.captures(text)?;
            let name = caps.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some(DetectedName {
                name: name.to_string(),
                language: pattern.language,
            })
        })
    }
}

impl Default for NameDetector {
    fn default() -> Self {
        Self::new()
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::En => "en",
        }
    }
}

const SPANISH_ACCENTS: &str = "áéíóúüñ¿¡";

const SPANISH_WORDS: &[&str] = &[
    "hola", "que", "qué", "como", "cómo", "por", "para", "quien", "quién", "es", "el", "la",
    "los", "las", "de", "del", "y", "un", "una", "mi", "me", "yo", "tu", "tú", "gracias",
    "buenos", "buenas", "dias", "días", "llamo", "nombre", "cual", "cuál", "donde", "dónde",
    "presidente", "quiero", "puedes", "necesito", "porque", "pero", "con", "sin", "muy",
];

/// One detection rule; the first rule that fires decides the language
#[derive(Debug, Clone)]
pub enum LanguageRule {
    /// Any of these characters appears in the text
    Characters(String),
    /// At least `min_hits` tokens appear in the word list
    WordHits { words: Vec<String>, min_hits: usize },
}

impl LanguageRule {
    pub fn word_hits(words: &[&str], min_hits: usize) -> Self {
        LanguageRule::WordHits {
            words: words.iter().map(|w| w.to_lowercase()).collect(),
            min_hits,
        }
    }

    fn fires(&self, text: &str) -> bool {
        match self {
            LanguageRule::Characters(chars) => text.chars().any(|c| chars.contains(c)),
            LanguageRule::WordHits { words, min_hits } => {
                let hits = text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|token| !token.is_empty())
                    .filter(|token| words.iter().any(|w| w == token))
                    .count();
                hits >= *min_hits
            }
        }
    }
}

/// Lexical language guess used for canned messages and fact templates
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    rules: Vec<(LanguageRule, Language)>,
    fallback: Language,
}

impl LanguageDetector {
    pub fn new() -> Self {
        Self {
            rules: vec![
                (LanguageRule::Characters(SPANISH_ACCENTS.to_string()), Language::Es),
                (LanguageRule::word_hits(SPANISH_WORDS, 2), Language::Es),
            ],
            fallback: Language::En,
        }
    }

    /// Append a rule after the built-in ones
    pub fn with_rule(mut self, rule: LanguageRule, language: Language) -> Self {
        self.rules.push((rule, language));
        self
    }

    pub fn detect(&self, text: &str) -> Language {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|(rule, _)| rule.fires(&lowered))
            .map(|(_, language)| *language)
            .unwrap_or(self.fallback)
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use super::language::Language;
use crate::outcome::Outcome;

pub const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Countries whose head of state can be answered without the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Country {
    Panama,
    Mexico,
}

impl Country {
    fn from_normalized(name: &str) -> Option<Self> {
        match name {
            "panama" => Some(Country::Panama),
            "mexico" => Some(Country::Mexico),
            _ => None,
        }
    }

    /// Wikidata item id
    pub fn entity_id(&self) -> &'static str {
        match self {
            Country::Panama => "Q804",
            Country::Mexico => "Q96",
        }
    }

    pub fn display_name(&self, language: Language) -> &'static str {
        match (self, language) {
            (Country::Panama, Language::Es) => "Panamá",
            (Country::Panama, Language::En) => "Panama",
            (Country::Mexico, Language::Es) => "México",
            (Country::Mexico, Language::En) => "Mexico",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactQuestion {
    pub country: Country,
    pub language: Language,
}

impl FactQuestion {
    pub fn answer(&self, head_of_state: &str) -> String {
        let country = self.country.display_name(self.language);
        match self.language {
            Language::Es => format!("El presidente de {} es {}.", country, head_of_state),
            Language::En => format!("The president of {} is {}.", country, head_of_state),
        }
    }
}

const FACT_PATTERNS: &[(&str, Language)] = &[
    (
        r"\bquien es (?:el |la )?(?:actual )?presidente? (?:actual )?de (panama|mexico)\b",
        Language::Es,
    ),
    (
        r"\bwho is (?:the )?(?:current )?president of (panama|mexico)\b",
        Language::En,
    ),
];

/// Recognizes head-of-state questions for the supported countries
#[derive(Debug, Clone)]
pub struct FactMatcher {
    patterns: Vec<(Regex, Language)>,
}

impl FactMatcher {
    pub fn new() -> Self {
        let patterns = FACT_PATTERNS
            .iter()
            .filter_map(|(p, language)| Regex::new(p).ok().map(|re| (re, *language)))
            .collect();

        Self { patterns }
    }

    pub fn detect(&self, text: &str) -> Option<FactQuestion> {
        let normalized = normalize(text);
        self.patterns.iter().find_map(|(re, language)| {
            let caps = re.captures(&normalized)?;
            let country = Country::from_normalized(caps.get(1)?.as_str())?;
            Some(FactQuestion {
                country,
                language: *language,
            })
        })
    }
}

impl Default for FactMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, fold Spanish accents and drop punctuation
fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            c if c.is_alphanumeric() || c.is_whitespace() => c,
            _ => ' ',
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("graph query failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("graph endpoint returned {0}")]
    Status(u16),
}

/// Single-shot knowledge-graph query for a country's head of state
#[async_trait]
pub trait FactLookup: Send + Sync {
    async fn head_of_state(&self, entity_id: &str, language: Language) -> Outcome<String>;
}

pub struct WikidataLookup {
    client: Client,
    endpoint: String,
}

impl WikidataLookup {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(3))
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn sparql(entity_id: &str, language: Language) -> String {
        format!(
            "SELECT ?headLabel WHERE {{ wd:{} wdt:P35 ?head . \
             SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"{},en\". }} }} LIMIT 1",
            entity_id,
            language.code()
        )
    }

    /// Walk a dotted path, indexing arrays by number
    fn extract_json_path<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
        path.split('.').try_fold(json, |current, part| match part.parse::<usize>() {
            Ok(index) => current.get(index),
            Err(_) => current.get(part),
        })
    }

    async fn query(&self, entity_id: &str, language: Language) -> Result<serde_json::Value, LookupError> {
        let query = Self::sparql(entity_id, language);
        let response = self
            .client
            .get(&self.endpoint)
            .header("accept", "application/sparql-results+json")
            .query(&[("query", query.as_str()), ("format", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl FactLookup for WikidataLookup {
    async fn head_of_state(&self, entity_id: &str, language: Language) -> Outcome<String> {
        let json = match self.query(entity_id, language).await {
            Ok(json) => json,
            Err(e) => return Outcome::Error(e.to_string()),
        };

        let label = Self::extract_json_path(&json, "results.bindings.0.headLabel.value")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();

        // The label service echoes the bare id when no label exists
        let unlabeled = label.len() > 1
            && label.starts_with('Q')
            && label[1..].chars().all(|c| c.is_ascii_digit());

        if label.is_empty() || unlabeled {
            Outcome::Unavailable(format!("no head of state found for {}", entity_id))
        } else {
            Outcome::Success(label.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_detect_spanish_question() {
        let matcher = FactMatcher::new();
        let q = matcher.detect("quien es el presidente de panama").unwrap();
        assert_eq!(q.country, Country::Panama);
        assert_eq!(q.language, Language::Es);

        let q = matcher.detect("¿Quién es el presidente actual de México?").unwrap();
        assert_eq!(q.country, Country::Mexico);
    }

    #[test]
    fn test_detect_english_question() {
        let q = FactMatcher::new()
            .detect("Who is the current president of Panama?")
            .unwrap();
        assert_eq!(q.language, Language::En);
        assert_eq!(q.answer("X"), "The president of Panama is X.");
    }

    #[test]
    fn test_other_countries_are_ignored() {
        let matcher = FactMatcher::new();
        assert!(matcher.detect("quien es el presidente de francia").is_none());
        assert!(matcher.detect("hola, me llamo Ana").is_none());
    }

    #[test]
    fn test_answer_template() {
        let q = FactQuestion {
            country: Country::Panama,
            language: Language::Es,
        };
        assert_eq!(q.answer("José Raúl Mulino"), "El presidente de Panamá es José Raúl Mulino.");
    }

    #[tokio::test]
    async fn test_wikidata_label() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sparql")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "json".into()),
                Matcher::Regex("Q804".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"results":{"bindings":[{"headLabel":{"type":"literal","value":"José Raúl Mulino"}}]}}"#)
            .create_async()
            .await;

        let lookup = WikidataLookup::new(format!("{}/sparql", server.url()), 5).unwrap();
        let out = lookup.head_of_state("Q804", Language::Es).await;
        assert_eq!(out, Outcome::Success("José Raúl Mulino".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wikidata_empty_result_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sparql")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"results":{"bindings":[]}}"#)
            .create_async()
            .await;

        let lookup = WikidataLookup::new(format!("{}/sparql", server.url()), 5).unwrap();
        assert!(matches!(
            lookup.head_of_state("Q804", Language::Es).await,
            Outcome::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_wikidata_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sparql")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let lookup = WikidataLookup::new(format!("{}/sparql", server.url()), 5).unwrap();
        match lookup.head_of_state("Q96", Language::En).await {
            Outcome::Error(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_path_indexes_arrays() {
        let json = serde_json::json!({"a": [{"b": "c"}]});
        assert_eq!(
            WikidataLookup::extract_json_path(&json, "a.0.b").and_then(|v| v.as_str()),
            Some("c")
        );
    }
}

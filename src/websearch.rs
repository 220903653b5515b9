//! Brave web search client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    web: Option<WebResults>,
}

#[derive(Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("brave search key not set")]
    MissingKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API returned status {0}")]
    Status(u16),
    #[error("failed to decode response: {0}")]
    Parse(String),
}

pub struct SearchClient {
    api_key: String,
    http: reqwest::Client,
}

impl SearchClient {
    pub fn new(api_key: String) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::Http(e.to_string()))?;
        Ok(Self { api_key, http })
    }

    /// Run a web search, returning results in ranking order.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::MissingKey);
        }

        info!("🔍 Searching: {}", query);

        let url = format!(
            "{}?count=7&safesearch=strict&text_decorations=false&result_filter=web&extra_snippets=true&q={}",
            SEARCH_URL,
            urlencoding::encode(query)
        );

        let response = self
            .http
            .get(&url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;
        let results = parse_results(&body)?;
        debug!("Search returned {} result(s)", results.len());
        Ok(results)
    }
}

fn parse_results(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;
    Ok(parsed.web.map(|w| w.results).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let body = r#"{"web":{"results":[
            {"title":"Moon","url":"https://nasa.gov/moon","description":"Rock","page_age":"2024"},
            {"title":"Cheese","url":"https://example.com"}
        ]}}"#;
        let results = parse_results(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Moon");
        assert_eq!(results[1].description, "");
    }

    #[test]
    fn test_parse_without_web_section() {
        assert!(parse_results(r#"{"type":"search"}"#).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let client = SearchClient::new(String::new()).unwrap();
        assert!(matches!(client.search("rust").await, Err(SearchError::MissingKey)));
    }
}

//! The web-search provider capability.
//!
//! Narrow trait the `web_search` tool is implemented against; the concrete
//! web-search provider is an external collaborator reached over a pooled
//! `reqwest::Client`, not core scope of this crate.

use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error;

use crate::loom::clients::common::get_shared_http_client;

/// One organic result from a search provider.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Capability a web-search tool implementation is built against.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, Box<dyn Error + Send + Sync>>;
}

/// Reference client for a generic key-based search API (the shape used by
/// Brave Search / SerpAPI-style providers: a GET request with a `q` query
/// parameter and an API key header).
pub struct HttpSearchProvider {
    api_key: String,
    endpoint: String,
}

impl HttpSearchProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct SearchApiResponse {
    web: Option<SearchApiWeb>,
}

#[derive(Deserialize)]
struct SearchApiWeb {
    results: Vec<SearchApiResult>,
}

#[derive(Deserialize)]
struct SearchApiResult {
    title: String,
    description: String,
    url: String,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, Box<dyn Error + Send + Sync>> {
        let resp = get_shared_http_client()
            .get(&self.endpoint)
            .query(&[("q", query)])
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(format!("search provider returned {}", status).into());
        }

        let parsed: SearchApiResponse = resp.json().await?;
        let results = parsed
            .web
            .map(|w| {
                w.results
                    .into_iter()
                    .map(|r| SearchResult {
                        title: r.title,
                        snippet: r.description,
                        url: r.url,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }
}

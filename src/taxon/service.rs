//! External taxonomic name services.
//!
//! Every service is a lookup by simple name that may return nothing, one
//! record or a list of homonyms with different authors. Responses are
//! mapped onto [`NameCandidate`] so the reconciler never sees a
//! service-specific schema.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use specimen_types::NameCandidate;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ServiceError;

#[async_trait]
pub trait NameService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, simple_name: &str) -> Result<Vec<NameCandidate>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Ipni,
    Powo,
    Col,
    Tropicos,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Ipni => "ipni",
            ServiceKind::Powo => "powo",
            ServiceKind::Col => "col",
            ServiceKind::Tropicos => "tropicos",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            ServiceKind::Ipni => "https://www.ipni.org/api/1/search",
            ServiceKind::Powo => "https://powo.science.kew.org/api/2/search",
            ServiceKind::Col => "https://api.checklistbank.org/dataset/3LR/nameusage/search",
            ServiceKind::Tropicos => "https://services.tropicos.org/Name/Search",
        }
    }
}

// ── Response schemas ─────────────────────────────────────────────────────

/// IPNI and POWO share a `{"results": [...]}` envelope.
#[derive(Debug, Deserialize)]
struct KewResponse {
    #[serde(default)]
    results: Vec<KewRecord>,
}

#[derive(Debug, Deserialize)]
struct KewRecord {
    name: String,
    /// IPNI says `authors`, POWO says `author`.
    #[serde(default, alias = "authors")]
    author: String,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    rank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColResponse {
    #[serde(default)]
    result: Vec<ColUsageWrapper>,
}

#[derive(Debug, Deserialize)]
struct ColUsageWrapper {
    usage: ColUsage,
    #[serde(default)]
    classification: Vec<ColTaxon>,
}

#[derive(Debug, Deserialize)]
struct ColUsage {
    name: ColName,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColName {
    scientific_name: String,
    #[serde(default)]
    authorship: String,
    #[serde(default)]
    rank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColTaxon {
    name: String,
    #[serde(default)]
    rank: String,
}

/// Tropicos answers `[{"Error": "No names were found"}]` for misses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TropicosRecord {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    scientific_name: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    rank_abbreviation: Option<String>,
}

/// Map one response body onto candidates.
pub fn parse_response(kind: ServiceKind, body: &str) -> Result<Vec<NameCandidate>, ServiceError> {
    let malformed = |e: serde_json::Error| ServiceError::Malformed {
        service: kind.as_str(),
        reason: e.to_string(),
    };
    let source = kind.as_str().to_string();
    let candidates = match kind {
        ServiceKind::Ipni | ServiceKind::Powo => {
            let resp: KewResponse = serde_json::from_str(body).map_err(malformed)?;
            resp.results
                .into_iter()
                .map(|r| NameCandidate {
                    name: r.name,
                    author: r.author,
                    family: r.family,
                    rank: r.rank,
                    source: source.clone(),
                })
                .collect()
        }
        ServiceKind::Col => {
            let resp: ColResponse = serde_json::from_str(body).map_err(malformed)?;
            resp.result
                .into_iter()
                .map(|r| NameCandidate {
                    family: r
                        .classification
                        .into_iter()
                        .find(|t| t.rank == "family")
                        .map(|t| t.name),
                    name: r.usage.name.scientific_name,
                    author: r.usage.name.authorship,
                    rank: r.usage.name.rank,
                    source: source.clone(),
                })
                .collect()
        }
        ServiceKind::Tropicos => {
            let records: Vec<TropicosRecord> = serde_json::from_str(body).map_err(malformed)?;
            records
                .into_iter()
                .filter(|r| r.error.is_none())
                .filter_map(|r| {
                    Some(NameCandidate {
                        name: r.scientific_name?,
                        author: r.author.unwrap_or_default(),
                        family: r.family,
                        rank: r.rank_abbreviation,
                        source: source.clone(),
                    })
                })
                .collect()
        }
    };
    Ok(candidates)
}

// ── HTTP client ──────────────────────────────────────────────────────────

pub fn default_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("specimen_clean/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub struct HttpNameService {
    kind: ServiceKind,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpNameService {
    pub fn new(kind: ServiceKind, client: Client) -> Self {
        Self {
            kind,
            client,
            base_url: kind.default_url().to_string(),
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn query(&self, simple_name: &str) -> Vec<(&'static str, String)> {
        let name = simple_name.to_string();
        match self.kind {
            ServiceKind::Ipni => vec![("q", name), ("perPage", "50".into())],
            ServiceKind::Powo => vec![("q", name)],
            ServiceKind::Col => vec![("q", name), ("limit", "50".into())],
            ServiceKind::Tropicos => {
                let mut q = vec![("name", name), ("type", "exact".into()), ("format", "json".into())];
                if let Some(key) = &self.api_key {
                    q.push(("apikey", key.clone()));
                }
                q
            }
        }
    }
}

#[async_trait]
impl NameService for HttpNameService {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn lookup(&self, simple_name: &str) -> Result<Vec<NameCandidate>, ServiceError> {
        let service = self.name();
        let response = self
            .client
            .get(&self.base_url)
            .query(&self.query(simple_name))
            .send()
            .await
            .map_err(|source| ServiceError::Transport { service, source })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited { service });
        }
        let response = response
            .error_for_status()
            .map_err(|source| ServiceError::Transport { service, source })?;
        let body = response
            .text()
            .await
            .map_err(|source| ServiceError::Transport { service, source })?;

        let candidates = parse_response(self.kind, &body)?;
        debug!(service, name = simple_name, found = candidates.len(), "name lookup");
        Ok(candidates)
    }
}

// ── Rate limiting ────────────────────────────────────────────────────────

/// Shared backoff: once any request is told to slow down, every caller
/// waits until the gate reopens.
#[derive(Debug)]
pub struct RateGate {
    open_at: Mutex<Instant>,
    backoff: Duration,
}

impl RateGate {
    pub fn new(backoff: Duration) -> Self {
        Self {
            open_at: Mutex::new(Instant::now()),
            backoff,
        }
    }

    pub async fn wait(&self) {
        let open_at = *self.open_at.lock().await;
        tokio::time::sleep_until(open_at).await;
    }

    pub async fn trip(&self) {
        let mut open_at = self.open_at.lock().await;
        let next = Instant::now() + self.backoff;
        if next > *open_at {
            warn!(backoff_ms = self.backoff.as_millis() as u64, "rate limited, backing off");
            *open_at = next;
        }
    }
}

//! Batch reconciliation against external name services.
//!
//! A batch is resolved in three passes: every unique simple name is
//! looked up concurrently under a semaphore, each (name, service) request
//! that failed is retried one at a time, and a service that keeps failing
//! contributes no candidates. Rows are then scored against the per-batch
//! cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use specimen_types::{NameCandidate, SplitTaxonName};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::TaxonRecord;
use super::authors::best_match;
use super::service::{NameService, RateGate};
use super::split::split;
use crate::cleaned::{Cleaned, Column, map_column};
use crate::error::ServiceError;

pub const DEFAULT_CONCURRENCY: usize = 200;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_RETRIES: usize = 2;

/// Candidate lists keyed by simple name, scoped to one batch.
pub type CandidateCache = HashMap<String, Vec<NameCandidate>>;

fn same_name(a: &str, b: &str) -> bool {
    let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    norm(a) == norm(b)
}

#[derive(Clone)]
pub struct Reconciler {
    services: Arc<Vec<Arc<dyn NameService>>>,
    permits: Arc<Semaphore>,
    gate: Arc<RateGate>,
    retries: usize,
}

impl Reconciler {
    pub fn new(services: Vec<Arc<dyn NameService>>) -> Self {
        Self {
            services: Arc::new(services),
            permits: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            gate: Arc::new(RateGate::new(DEFAULT_BACKOFF)),
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.gate = Arc::new(RateGate::new(backoff));
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Ask the services at `which` in turn; candidates must carry the
    /// queried name. Returns what was found and the services that failed.
    async fn query(&self, simple_name: &str, which: &[usize]) -> (Vec<NameCandidate>, Vec<usize>) {
        let mut found = Vec::new();
        let mut failed = Vec::new();
        for &i in which {
            let Some(service) = self.services.get(i) else {
                continue;
            };
            self.gate.wait().await;
            match service.lookup(simple_name).await {
                Ok(candidates) => found.extend(
                    candidates
                        .into_iter()
                        .filter(|c| same_name(&c.name, simple_name)),
                ),
                Err(e) => {
                    if matches!(e, ServiceError::RateLimited { .. }) {
                        self.gate.trip().await;
                    }
                    warn!(name = simple_name, service = service.name(), error = %e, "lookup failed");
                    failed.push(i);
                }
            }
        }
        (found, failed)
    }

    /// Look up each unique name once. Never fails: a request that cannot
    /// be fetched adds no candidates.
    pub async fn lookup_all(&self, names: BTreeSet<String>) -> CandidateCache {
        let total = names.len();
        let every: Vec<usize> = (0..self.services.len()).collect();
        let mut cache = CandidateCache::new();
        let mut failed = Vec::new();

        let mut tasks = JoinSet::new();
        for name in names {
            let this = self.clone();
            let every = every.clone();
            tasks.spawn(async move {
                let _permit = this.permits.acquire().await.ok();
                let (found, failed) = this.query(&name, &every).await;
                (name, found, failed)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, found, pending)) => {
                    if !pending.is_empty() {
                        failed.push((name.clone(), pending));
                    }
                    cache.insert(name, found);
                }
                Err(e) => warn!(error = %e, "lookup task did not complete"),
            }
        }

        let retried = failed.len();
        for (name, mut pending) in failed {
            for attempt in 1..=self.retries {
                if pending.is_empty() {
                    break;
                }
                let (found, still) = self.query(&name, &pending).await;
                cache.entry(name.clone()).or_default().extend(found);
                pending = still;
                if !pending.is_empty() {
                    warn!(%name, attempt, services = pending.len(), "retry failed");
                }
            }
        }

        info!(unique = total, retried, "name lookups finished");
        cache
    }

    /// Score one split name against its cached candidates.
    pub fn score(name: &SplitTaxonName, candidates: &[NameCandidate]) -> Cleaned<TaxonRecord> {
        match best_match(&name.author, candidates) {
            Some(best) if best.tied => Cleaned::Doubtful(TaxonRecord::from(&best)),
            Some(best) => Cleaned::Ok(TaxonRecord::from(&best)),
            None => Cleaned::Doubtful(TaxonRecord::from(name)),
        }
    }

    pub async fn reconcile(&self, name: &SplitTaxonName) -> Cleaned<TaxonRecord> {
        let simple = name.simple_name();
        let cache = self.lookup_all(BTreeSet::from([simple.clone()])).await;
        let candidates = cache.get(&simple).map_or(&[][..], Vec::as_slice);
        Self::score(name, candidates)
    }

    pub async fn resolve_column(&self, column: &Column) -> Vec<Option<Cleaned<TaxonRecord>>> {
        let splits = map_column(column, |text| {
            if text.trim().is_empty() {
                return None;
            }
            Some(match split(text) {
                Some(name) => Cleaned::Ok(name),
                None => Cleaned::NeedsReview(text.to_string()),
            })
        });

        let names: BTreeSet<String> = splits
            .iter()
            .flatten()
            .filter_map(|c| c.value().map(SplitTaxonName::simple_name))
            .collect();
        let cache = self.lookup_all(names).await;

        splits
            .into_iter()
            .map(|row| {
                Some(match row? {
                    Cleaned::Ok(name) | Cleaned::Doubtful(name) => {
                        let candidates = cache
                            .get(&name.simple_name())
                            .map_or(&[][..], Vec::as_slice);
                        Self::score(&name, candidates)
                    }
                    Cleaned::NeedsReview(raw) => Cleaned::NeedsReview(raw),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct MockService {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        /// Number of leading calls answered with a rate-limit error.
        throttled: usize,
        broken: bool,
        records: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl NameService for MockService {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn lookup(&self, simple_name: &str) -> Result<Vec<NameCandidate>, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if n < self.throttled {
                return Err(ServiceError::RateLimited { service: "mock" });
            }
            if self.broken {
                return Err(ServiceError::Malformed {
                    service: "mock",
                    reason: "not json".into(),
                });
            }
            Ok(self
                .records
                .iter()
                .filter(|(name, _)| *name == simple_name)
                .map(|(name, author)| NameCandidate {
                    name: name.to_string(),
                    author: author.to_string(),
                    family: Some("Poaceae".into()),
                    rank: None,
                    source: "mock".into(),
                })
                .collect())
        }
    }

    fn poa() -> MockService {
        MockService {
            records: vec![("Poa annua", "L."), ("Poa annua", "Steud.")],
            ..Default::default()
        }
    }

    fn reconciler(mock: &Arc<MockService>) -> Reconciler {
        Reconciler::new(vec![mock.clone() as Arc<dyn NameService>])
            .with_concurrency(4)
            .with_backoff(Duration::from_millis(1))
    }

    fn record(author: &str) -> TaxonRecord {
        TaxonRecord {
            name: "Poa annua".into(),
            author: author.into(),
            family: Some("Poaceae".into()),
        }
    }

    #[tokio::test]
    async fn test_duplicates_are_looked_up_once() {
        let mock = Arc::new(poa());
        let mut column: Column = vec![Some("Poa annua L.".into()); 5];
        column.extend([
            Some("Poa  annua Steud.".into()),
            None,
            Some("!Poa".into()),
            Some("poa annua".into()),
        ]);

        let out = reconciler(&mock).resolve_column(&column).await;
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), 9);
        for row in &out[..5] {
            assert_eq!(row, &Some(Cleaned::Ok(record("L."))));
        }
        assert_eq!(out[5], Some(Cleaned::Ok(record("Steud."))));
        assert_eq!(out[6], None);
        assert_eq!(out[7], Some(Cleaned::NeedsReview("!Poa".into())));
        assert_eq!(out[8], Some(Cleaned::NeedsReview("poa annua".into())));
    }

    #[tokio::test]
    async fn test_rate_limited_lookup_is_retried() {
        let mock = Arc::new(MockService {
            throttled: 1,
            ..poa()
        });
        let name = split("Poa annua L.").unwrap();
        let result = reconciler(&mock).reconcile(&name).await;
        assert_eq!(result, Cleaned::Ok(record("L.")));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_service_falls_back_to_split_name() {
        let mock = Arc::new(MockService {
            broken: true,
            ..poa()
        });
        let name = split("Poa annua L.").unwrap();
        let result = reconciler(&mock).with_retries(2).reconcile(&name).await;
        assert_eq!(
            result,
            Cleaned::Doubtful(TaxonRecord {
                name: "Poa annua".into(),
                author: "L.".into(),
                family: None,
            })
        );
        // one concurrent attempt plus two retries
        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_one_broken_service_keeps_the_others() {
        let good = Arc::new(poa());
        let bad = Arc::new(MockService {
            broken: true,
            ..Default::default()
        });
        let r = Reconciler::new(vec![
            good.clone() as Arc<dyn NameService>,
            bad.clone() as Arc<dyn NameService>,
        ])
        .with_backoff(Duration::from_millis(1))
        .with_retries(2);

        let name = split("Poa annua L.").unwrap();
        assert_eq!(r.reconcile(&name).await, Cleaned::Ok(record("L.")));
        // only the broken service is asked again
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lookups_stay_under_the_concurrency_limit() {
        let mock = Arc::new(poa());
        let epithets = [
            "annua", "alpina", "bulbosa", "compressa", "nemoralis", "palustris", "pratensis",
            "trivialis", "angustifolia", "supina", "infirma", "glauca",
        ];
        let names: BTreeSet<String> = epithets.iter().map(|e| format!("Poa {e}")).collect();

        let cache = reconciler(&mock).with_concurrency(3).lookup_all(names).await;
        assert_eq!(cache.len(), epithets.len());
        assert_eq!(mock.calls.load(Ordering::SeqCst), epithets.len());
        let peak = mock.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak in-flight lookups was {peak}");
        assert_eq!(cache["Poa annua"].len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_and_tied_authors_are_doubtful() {
        let mock = Arc::new(poa());
        let r = reconciler(&mock);

        let name = split("Poa annua Franch.").unwrap();
        assert!(matches!(r.reconcile(&name).await, Cleaned::Doubtful(rec) if rec.family.is_none()));

        let tied = Arc::new(MockService {
            records: vec![("Poa annua", "L."), ("Poa annua", "L.")],
            ..Default::default()
        });
        let name = split("Poa annua L.").unwrap();
        assert_eq!(
            reconciler(&tied).reconcile(&name).await,
            Cleaned::Doubtful(record("L."))
        );
    }
}

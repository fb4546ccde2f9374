use crate::discovery::model::{DiscoveredResource, Inventory, ResourceKind, SkipRecord};
use crate::discovery::provider::{CloudProvider, ProviderError, ResourcePage};
use crate::discovery::retry::RetryPolicy;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on pages per kind, guards against a provider that never ends
const MAX_PAGES_PER_KIND: usize = 10_000;

/// Fans out one listing per resource kind and joins the results.
///
/// Each kind retries independently; a kind that keeps failing becomes a
/// `SkipRecord` and never affects the others.
pub struct InventoryFetcher {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
    kinds: Vec<ResourceKind>,
}

struct KindFailure {
    error: ProviderError,
    attempts: u32,
}

impl InventoryFetcher {
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            kinds: ResourceKind::ALL.to_vec(),
        }
    }

    /// Restrict discovery to an allowlist of kinds
    pub fn with_kinds(mut self, kinds: &[ResourceKind]) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        self.kinds = kinds;
        self
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Enumerate every configured kind in `project_id`
    pub async fn fetch(&self, project_id: &str) -> Inventory {
        let start_time = Instant::now();
        info!(
            "Starting discovery of {} resource kinds in project {}",
            self.kinds.len(),
            project_id
        );

        let futures = self.kinds.iter().map(|&kind| {
            let provider = self.provider.clone();
            let retry = self.retry;
            async move {
                let kind_start = Instant::now();
                let result = fetch_kind(provider.as_ref(), retry, project_id, kind).await;
                match &result {
                    Ok(items) => debug!(
                        "Listed {} {} in {:?}",
                        items.len(),
                        kind.label(),
                        kind_start.elapsed()
                    ),
                    Err(failure) => warn!(
                        "Skipping {} after {} attempt(s): {}",
                        kind.label(),
                        failure.attempts,
                        failure.error
                    ),
                }
                (kind, result)
            }
        });

        let results = join_all(futures).await;

        let mut inventory = Inventory {
            project_id: project_id.to_string(),
            ..Inventory::default()
        };
        let mut seen = HashSet::new();

        for (kind, result) in results {
            match result {
                Ok(items) => {
                    for item in items {
                        if seen.insert(item.entry_ref()) {
                            inventory.resources.push(item);
                        } else {
                            warn!("Duplicate {} '{}' dropped", kind, item.identifier);
                        }
                    }
                }
                Err(failure) => inventory.skipped.push(SkipRecord {
                    kind,
                    error: failure.error.to_string(),
                    attempts: failure.attempts,
                }),
            }
        }

        inventory
            .resources
            .sort_by(|a, b| (a.kind, &a.identifier).cmp(&(b.kind, &b.identifier)));
        inventory.skipped.sort_by_key(|s| s.kind);

        info!(
            "Discovery completed: {} resources, {} kinds skipped in {:?}",
            inventory.resources.len(),
            inventory.skipped.len(),
            start_time.elapsed()
        );

        inventory
    }
}

/// Drain every page of one kind
async fn fetch_kind(
    provider: &dyn CloudProvider,
    retry: RetryPolicy,
    project_id: &str,
    kind: ResourceKind,
) -> Result<Vec<DiscoveredResource>, KindFailure> {
    let mut items = Vec::new();
    let mut token: Option<String> = None;
    let mut seen_tokens = HashSet::new();

    // One retry budget shared by every page of the kind
    let mut retries = 0;

    for _ in 0..MAX_PAGES_PER_KIND {
        let page = fetch_page(provider, retry, &mut retries, project_id, kind, token.as_deref()).await?;
        items.extend(page.items.into_iter().filter(|item| item.kind == kind));

        match page.next_page_token {
            Some(next) if !seen_tokens.insert(next.clone()) => {
                return Err(KindFailure {
                    error: ProviderError::InvalidResponse(format!(
                        "page token '{}' returned twice",
                        next
                    )),
                    attempts: 1,
                });
            }
            Some(next) => token = Some(next),
            None => return Ok(items),
        }
    }

    Err(KindFailure {
        error: ProviderError::InvalidResponse(format!(
            "more than {} pages returned",
            MAX_PAGES_PER_KIND
        )),
        attempts: 1,
    })
}

/// Fetch one page, retrying transient failures with exponential backoff.
///
/// `retries` is the kind's budget already spent on earlier pages.
async fn fetch_page(
    provider: &dyn CloudProvider,
    retry: RetryPolicy,
    retries: &mut u32,
    project_id: &str,
    kind: ResourceKind,
    token: Option<&str>,
) -> Result<ResourcePage, KindFailure> {
    loop {
        match provider.list_page(project_id, kind, token).await {
            Ok(page) => return Ok(page),
            Err(error) if error.is_transient() && *retries < retry.max_retries => {
                let delay = retry.delay_for(*retries);
                debug!(
                    "Transient error listing {} (retry {}/{} in {:?}): {}",
                    kind,
                    *retries + 1,
                    retry.max_retries,
                    delay,
                    error
                );
                tokio::time::sleep(delay).await;
                *retries += 1;
            }
            Err(error) => {
                return Err(KindFailure {
                    error,
                    attempts: *retries + 1,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider that replays scripted responses per kind
    struct ScriptedProvider {
        responses: Mutex<HashMap<ResourceKind, Vec<Result<ResourcePage, ProviderError>>>>,
        calls: Mutex<HashMap<ResourceKind, u32>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<(ResourceKind, Vec<Result<ResourcePage, ProviderError>>)>) -> Self {
            Self {
                responses: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, kind: ResourceKind) -> u32 {
            self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl CloudProvider for ScriptedProvider {
        async fn list_page(
            &self,
            _project_id: &str,
            kind: ResourceKind,
            _page_token: Option<&str>,
        ) -> Result<ResourcePage, ProviderError> {
            *self.calls.lock().unwrap().entry(kind).or_default() += 1;
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(&kind) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Ok(ResourcePage::default()),
            }
        }
    }

    fn bucket(name: &str) -> DiscoveredResource {
        DiscoveredResource::new("p", ResourceKind::ObjectStore, name).with_attribute("name", name)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_pages_are_drained() {
        let provider = Arc::new(ScriptedProvider::new(vec![(
            ResourceKind::ObjectStore,
            vec![
                Ok(ResourcePage {
                    items: vec![bucket("b")],
                    next_page_token: Some("2".into()),
                }),
                Ok(ResourcePage::last(vec![bucket("a")])),
            ],
        )]));
        let fetcher = InventoryFetcher::new(provider.clone(), fast_retry())
            .with_kinds(&[ResourceKind::ObjectStore]);

        let inventory = fetcher.fetch("p").await;
        let names: Vec<_> = inventory.resources.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(inventory.skipped.is_empty());
        assert_eq!(provider.calls(ResourceKind::ObjectStore), 2);
    }

    #[tokio::test]
    async fn test_empty_kind_is_not_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let fetcher = InventoryFetcher::new(provider, fast_retry());
        let inventory = fetcher.fetch("p").await;
        assert!(inventory.resources.is_empty());
        assert!(inventory.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![(
            ResourceKind::ObjectStore,
            vec![
                Err(ProviderError::RateLimited("429".into())),
                Err(ProviderError::RateLimited("429".into())),
                Ok(ResourcePage::last(vec![bucket("a")])),
            ],
        )]));
        let fetcher = InventoryFetcher::new(provider.clone(), fast_retry())
            .with_kinds(&[ResourceKind::ObjectStore]);

        let inventory = fetcher.fetch("p").await;
        assert_eq!(inventory.resources.len(), 1);
        assert_eq!(provider.calls(ResourceKind::ObjectStore), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_only_that_kind() {
        let rate_limited: Vec<_> = (0..6)
            .map(|_| Err(ProviderError::RateLimited("429".into())))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(vec![
            (ResourceKind::ComputeService, rate_limited),
            (
                ResourceKind::ObjectStore,
                vec![Ok(ResourcePage::last(vec![bucket("a")]))],
            ),
        ]));
        let fetcher = InventoryFetcher::new(provider.clone(), fast_retry())
            .with_kinds(&[ResourceKind::ComputeService, ResourceKind::ObjectStore]);

        let inventory = fetcher.fetch("p").await;
        assert_eq!(inventory.resources.len(), 1);
        assert_eq!(inventory.skipped.len(), 1);
        assert_eq!(inventory.skipped[0].kind, ResourceKind::ComputeService);
        assert_eq!(inventory.skipped[0].attempts, 6);
        // initial call plus five retries
        assert_eq!(provider.calls(ResourceKind::ComputeService), 6);
    }

    #[tokio::test]
    async fn test_retry_budget_is_shared_across_pages() {
        let rate_limited = || Err(ProviderError::RateLimited("429".into()));
        let provider = Arc::new(ScriptedProvider::new(vec![(
            ResourceKind::NetworkConnector,
            vec![
                rate_limited(),
                Ok(ResourcePage {
                    items: vec![],
                    next_page_token: Some("1".into()),
                }),
                rate_limited(),
                rate_limited(),
                Ok(ResourcePage::last(vec![])),
            ],
        )]));
        let fetcher = InventoryFetcher::new(provider.clone(), RetryPolicy::new(2, Duration::from_millis(1)))
            .with_kinds(&[ResourceKind::NetworkConnector]);

        let inventory = fetcher.fetch("p").await;
        assert_eq!(inventory.skipped.len(), 1);
        assert_eq!(inventory.skipped[0].attempts, 3);
        assert_eq!(provider.calls(ResourceKind::NetworkConnector), 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![(
            ResourceKind::ManagedDatabase,
            vec![Err(ProviderError::Unavailable("SERVICE_DISABLED".into()))],
        )]));
        let fetcher = InventoryFetcher::new(provider.clone(), fast_retry())
            .with_kinds(&[ResourceKind::ManagedDatabase]);

        let inventory = fetcher.fetch("p").await;
        assert_eq!(inventory.skipped.len(), 1);
        assert_eq!(inventory.skipped[0].attempts, 1);
        assert_eq!(provider.calls(ResourceKind::ManagedDatabase), 1);
    }

    #[tokio::test]
    async fn test_repeated_page_token_is_a_failure() {
        let page = || {
            Ok(ResourcePage {
                items: vec![bucket("a")],
                next_page_token: Some("same".into()),
            })
        };
        let provider = Arc::new(ScriptedProvider::new(vec![(
            ResourceKind::ObjectStore,
            vec![page(), page()],
        )]));
        let fetcher = InventoryFetcher::new(provider, fast_retry())
            .with_kinds(&[ResourceKind::ObjectStore]);

        let inventory = fetcher.fetch("p").await;
        assert!(inventory.resources.is_empty());
        assert!(inventory.skipped[0].error.contains("returned twice"));
    }
}

//! Model router with automatic failover across providers

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::availability::AvailabilityTracker;
use crate::catalog::ModelCatalog;
use crate::error::{ProviderError, ProviderErrorKind, RouterError};
use crate::providers::{ProviderAdapter, adapter_for};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::types::{CanonicalResponse, ChatMessage};

/// Upper bound on a single provider call, including response download
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(180);

/// Bookkeeping for one routed request
struct RequestState<'a> {
    id: Uuid,
    /// (provider, backend model) pairs already called
    attempted: HashSet<(&'a str, &'a str)>,
    /// Providers whose credential was rejected; no model will work
    rejected: HashSet<&'a str>,
    /// Providers that failed transiently during this request
    failed: Vec<&'a str>,
    calls: usize,
}

impl<'a> RequestState<'a> {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            attempted: HashSet::new(),
            rejected: HashSet::new(),
            failed: Vec::new(),
            calls: 0,
        }
    }

    fn record_call(&mut self, provider: &'a str, model: &'a str) {
        self.attempted.insert((provider, model));
        self.calls += 1;
    }

    fn record_failure(&mut self, provider: &'a str, kind: ProviderErrorKind) {
        if kind == ProviderErrorKind::AuthFailure {
            self.rejected.insert(provider);
        }
        if kind.is_transient() {
            self.failed.push(provider);
        }
    }

    /// Whether automatic selection should pass over this provider
    fn should_skip(&self, provider: &ProviderDescriptor) -> bool {
        self.rejected.contains(provider.name())
            || self
                .attempted
                .contains(&(provider.name(), provider.default_model()))
    }

    /// First provider in `rest` that automatic selection would still call
    fn next_pending<'c>(
        &self,
        rest: &'c [&'c ProviderDescriptor],
    ) -> Option<&'c ProviderDescriptor> {
        rest.iter().copied().find(|p| !self.should_skip(p))
    }
}

enum AttemptOutcome {
    Success(CanonicalResponse),
    Failed(ProviderError),
    Cancelled,
}

/// Routes chat requests across providers in priority order, skipping
/// providers in cooldown and falling over on failure
pub struct Router {
    /// Enabled providers in failover order (index 0 = primary)
    providers: Vec<ProviderDescriptor>,
    /// Providers configured without a credential
    disabled: Vec<String>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    catalog: ModelCatalog,
    tracker: Arc<AvailabilityTracker>,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.providers)
            .field("disabled", &self.disabled)
            .field("catalog", &self.catalog.len())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl Router {
    /// Build a router for the registry's enabled providers, one adapter per
    /// provider sharing a single HTTP client
    pub fn new(
        registry: &ProviderRegistry,
        catalog: ModelCatalog,
        tracker: Arc<AvailabilityTracker>,
        client: Client,
    ) -> Self {
        let providers = registry
            .enabled()
            .into_iter()
            .map(|p| {
                let adapter = adapter_for(p.family(), client.clone());
                (p, adapter)
            })
            .collect();
        let mut router = Self::with_adapters(providers, catalog, tracker);
        router.disabled = registry
            .all()
            .iter()
            .filter(|p| !p.is_enabled())
            .map(|p| p.name().to_string())
            .collect();
        router
    }

    /// Build a router from explicit (descriptor, adapter) pairs.
    /// Disabled descriptors are kept for status reporting only.
    pub fn with_adapters(
        providers: Vec<(ProviderDescriptor, Arc<dyn ProviderAdapter>)>,
        catalog: ModelCatalog,
        tracker: Arc<AvailabilityTracker>,
    ) -> Self {
        let mut enabled = Vec::new();
        let mut disabled = Vec::new();
        let mut adapters = HashMap::new();

        for (descriptor, adapter) in providers {
            if descriptor.is_enabled() {
                adapters.insert(descriptor.name().to_string(), adapter);
                enabled.push(descriptor);
            } else {
                disabled.push(descriptor.name().to_string());
            }
        }
        enabled.sort_by_key(|p| p.priority());

        if enabled.is_empty() {
            warn!(
                "Router built with no enabled providers; every request will fail"
            );
        }

        Self {
            providers: enabled,
            disabled,
            adapters,
            catalog,
            tracker,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Route one chat request. See [`Router::generate_response_with_cancel`].
    pub async fn generate_response(
        &self,
        messages: &[ChatMessage],
        pinned_model_id: Option<&str>,
    ) -> Result<CanonicalResponse, RouterError> {
        self.generate_response_with_cancel(messages, pinned_model_id, &CancellationToken::new())
            .await
    }

    /// Route one chat request.
    ///
    /// A pinned model that resolves is tried first. A rate-limited failure,
    /// pinned or not, is returned immediately; other failures fall over to
    /// the next candidate. A pinned provider whose backend model failed is
    /// still tried with its default model unless its credential was
    /// rejected. Cancelling `cancel` abandons the request.
    pub async fn generate_response_with_cancel(
        &self,
        messages: &[ChatMessage],
        pinned_model_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CanonicalResponse, RouterError> {
        let mut state = RequestState::new();
        let request_id = state.id;

        if let Some(model_id) = pinned_model_id {
            if let Some((provider, backend_model)) = self.resolve_pinned(model_id) {
                debug!(
                    "[{}] Pinned model {} -> {} ({})",
                    request_id,
                    model_id,
                    provider.name(),
                    backend_model
                );
                state.record_call(provider.name(), backend_model);

                match self
                    .attempt(provider, backend_model, messages, cancel, request_id)
                    .await
                {
                    AttemptOutcome::Success(response) => {
                        self.tracker
                            .record_success_for_request(provider.name(), &state.failed);
                        return Ok(response);
                    }
                    AttemptOutcome::Cancelled => return Err(RouterError::Cancelled),
                    AttemptOutcome::Failed(err) => {
                        if let Some(rate_limit) = err.rate_limit {
                            return Err(RouterError::RateLimited {
                                provider: err.provider,
                                rate_limit,
                            });
                        }
                        state.record_failure(provider.name(), err.kind);
                        info!(
                            "[{}] Pinned model {} failed ({}), falling back to automatic selection",
                            request_id, model_id, err.kind
                        );
                    }
                }
            }
        }

        let candidates = self.tracker.candidates(&self.providers);
        if candidates.is_empty() {
            warn!(
                "[{}] No providers available ({} enabled, all in cooldown)",
                request_id,
                self.providers.len()
            );
            return Err(RouterError::AllProvidersUnavailable);
        }

        debug!(
            "[{}] Candidates: {}",
            request_id,
            candidates
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for (idx, provider) in candidates.iter().enumerate() {
            if state.should_skip(provider) {
                debug!(
                    "[{}] Skipping {}, already tried",
                    request_id, provider.name()
                );
                continue;
            }
            state.record_call(provider.name(), provider.default_model());

            match self
                .attempt(provider, provider.default_model(), messages, cancel, request_id)
                .await
            {
                AttemptOutcome::Success(response) => {
                    if state.calls > 1 {
                        info!(
                            "[{}] Request succeeded on failover provider {} ({})",
                            request_id,
                            provider.name(),
                            provider.default_model()
                        );
                    }
                    self.tracker
                        .record_success_for_request(provider.name(), &state.failed);
                    return Ok(response);
                }
                AttemptOutcome::Cancelled => return Err(RouterError::Cancelled),
                AttemptOutcome::Failed(err) => {
                    if let Some(rate_limit) = err.rate_limit {
                        return Err(RouterError::RateLimited {
                            provider: err.provider,
                            rate_limit,
                        });
                    }
                    state.record_failure(provider.name(), err.kind);
                    if let Some(next) = state.next_pending(&candidates[idx + 1..]) {
                        info!(
                            "[{}] Failing over from {} to {}",
                            request_id,
                            provider.name(),
                            next.name()
                        );
                    }
                }
            }
        }

        warn!(
            "[{}] All providers failed after {} attempt(s)",
            request_id, state.calls
        );
        Err(RouterError::AllProvidersFailed {
            attempts: state.calls,
        })
    }

    /// One adapter call under the attempt timeout. Failures are recorded
    /// with the tracker; successes are left to the caller.
    async fn attempt(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        request_id: Uuid,
    ) -> AttemptOutcome {
        let Some(adapter) = self.adapters.get(provider.name()) else {
            error!("No adapter registered for provider {}", provider.name());
            return AttemptOutcome::Failed(ProviderError::new(
                provider.name(),
                ProviderErrorKind::UnknownFailure,
                "no adapter registered",
            ));
        };

        debug!(
            "[{}] Trying provider {} ({})",
            request_id, provider.name(), model
        );

        let call = tokio::time::timeout(
            self.attempt_timeout,
            adapter.call(provider, model, messages),
        );
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    "[{}] Cancelled while waiting on {}",
                    request_id, provider.name()
                );
                return AttemptOutcome::Cancelled;
            }
            result = call => match result {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(
                    provider.name(),
                    format!("no response within {:?}", self.attempt_timeout),
                )),
            },
        };

        match result {
            Ok(response) => AttemptOutcome::Success(response),
            Err(err) => {
                warn!(
                    "[{}] Provider {} ({}) failed: {}",
                    request_id,
                    provider.name(),
                    model,
                    err
                );
                self.tracker.record_failure(provider.name(), err.kind);
                AttemptOutcome::Failed(err)
            }
        }
    }

    /// Resolve a pinned model id to an enabled provider and backend model
    fn resolve_pinned(&self, model_id: &str) -> Option<(&ProviderDescriptor, &str)> {
        let Some(entry) = self.catalog.resolve(model_id) else {
            debug!(
                "Model id {} is not pinned, using automatic selection",
                model_id
            );
            return None;
        };
        let provider = self.providers.iter().find(|p| p.name() == entry.provider);
        if provider.is_none() {
            warn!(
                "Model {} maps to provider {} which is not enabled",
                model_id, entry.provider
            );
        }
        provider.map(|p| (p, entry.backend_model.as_str()))
    }

    /// Availability of every configured provider. Disabled providers report
    /// `false`.
    pub fn provider_status(&self) -> BTreeMap<String, bool> {
        let mut status: BTreeMap<String, bool> = self
            .providers
            .iter()
            .map(|p| (p.name().to_string(), self.tracker.is_available(p.name())))
            .collect();
        for name in &self.disabled {
            status.insert(name.clone(), false);
        }
        status
    }

    /// The provider automatic selection would try first right now
    pub fn current_provider(&self) -> Option<String> {
        self.tracker
            .candidates(&self.providers)
            .first()
            .map(|p| p.name().to_string())
    }

    /// Clear every cooldown
    pub fn reset_availability(&self) {
        self.tracker.reset();
    }

    /// Enabled providers in failover order
    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::catalog::ModelCatalogEntry;
    use crate::registry::ProviderFamily;
    use crate::types::RateLimitInfo;

    #[derive(Clone)]
    enum Outcome {
        Reply(&'static str),
        Fail(ProviderErrorKind),
        RateLimited(Option<f64>),
        Slow(&'static str, u64),
        Hang,
    }

    /// Mock adapter scripted per backend model or provider name; records
    /// every call
    #[derive(Default)]
    struct ScriptedAdapter {
        outcomes: Mutex<HashMap<String, Outcome>>,
        calls: Mutex<Vec<(String, String)>>,
        seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedAdapter {
        /// Script a provider name or a backend model. Model keys win.
        fn set(&self, key: &str, outcome: Outcome) {
            self.outcomes.lock().unwrap().insert(key.to_string(), outcome);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        fn models(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }

        fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn family(&self) -> ProviderFamily {
            ProviderFamily::OpenAi
        }

        async fn call(
            &self,
            provider: &ProviderDescriptor,
            model: &str,
            messages: &[ChatMessage],
        ) -> Result<CanonicalResponse, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((provider.name().to_string(), model.to_string()));
            self.seen_messages.lock().unwrap().push(messages.to_vec());
            let outcome = {
                let outcomes = self.outcomes.lock().unwrap();
                outcomes
                    .get(model)
                    .or_else(|| outcomes.get(provider.name()))
                    .cloned()
                    .unwrap_or(Outcome::Reply("ok"))
            };
            match outcome {
                Outcome::Reply(text) => Ok(CanonicalResponse::new(text, provider.name(), model)),
                Outcome::Fail(kind) => Err(ProviderError::new(provider.name(), kind, "scripted")),
                Outcome::RateLimited(secs) => Err(ProviderError::rate_limited(
                    provider.name(),
                    RateLimitInfo::new(secs),
                    "scripted 429",
                )),
                Outcome::Slow(text, millis) => {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(CanonicalResponse::new(text, provider.name(), model))
                }
                Outcome::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn descriptor(name: &str, priority: u32) -> ProviderDescriptor {
        ProviderDescriptor::new(
            name,
            ProviderFamily::OpenAi,
            "key",
            "https://example.com",
            format!("{}-default", name),
            priority,
        )
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            ModelCatalogEntry::new("pinned-x", "X", "x", "x-large"),
            ModelCatalogEntry::new("pinned-2", "Two", "2", "two-large"),
            ModelCatalogEntry::new("pinned-1-big", "One Big", "1", "one-large"),
            ModelCatalogEntry::new("pinned-1-default", "One", "1", "1-default"),
            ModelCatalogEntry::new("pinned-off", "Off", "off", "off-model"),
        ])
    }

    fn router_with(
        providers: Vec<ProviderDescriptor>,
        cooldown: Duration,
    ) -> (Router, Arc<ScriptedAdapter>) {
        let adapter = Arc::new(ScriptedAdapter::default());
        let pairs = providers
            .into_iter()
            .map(|p| (p, adapter.clone() as Arc<dyn ProviderAdapter>))
            .collect();
        let router = Router::with_adapters(
            pairs,
            catalog(),
            Arc::new(AvailabilityTracker::new(cooldown)),
        );
        (router, adapter)
    }

    fn three() -> (Router, Arc<ScriptedAdapter>) {
        router_with(
            vec![descriptor("3", 3), descriptor("1", 1), descriptor("2", 2)],
            Duration::from_secs(30),
        )
    }

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("hello")]
    }

    #[tokio::test]
    async fn test_attempts_in_priority_order() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Fail(ProviderErrorKind::Overloaded));
        adapter.set("2", Outcome::Fail(ProviderErrorKind::UnknownFailure));
        adapter.set("3", Outcome::Reply("third"));

        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.text, "third");
        assert_eq!(adapter.calls(), vec!["1", "2", "3"]);
        assert_eq!(adapter.models(), vec!["1-default", "2-default", "3-default"]);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let (router, adapter) = three();
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.provider_name, "1");
        assert_eq!(adapter.calls(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_messages_passed_unchanged() {
        let (router, adapter) = three();
        router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(adapter.seen_messages.lock().unwrap()[0], msgs());
    }

    #[tokio::test]
    async fn test_failure_excludes_provider_from_next_request() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Fail(ProviderErrorKind::Timeout));
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.provider_name, "2");

        adapter.set("1", Outcome::Reply("one"));
        adapter.clear_calls();
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.provider_name, "2");
        assert_eq!(adapter.calls(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_exhausted_then_unavailable() {
        let (router, adapter) = three();
        for name in ["1", "2", "3"] {
            adapter.set(name, Outcome::Fail(ProviderErrorKind::Overloaded));
        }
        let err = router.generate_response(&msgs(), None).await.unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersFailed { attempts: 3 }));

        adapter.clear_calls();
        let err = router.generate_response(&msgs(), None).await.unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersUnavailable));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_skips_excluded_provider() {
        let (router, adapter) = router_with(
            vec![descriptor("a", 1), descriptor("b", 2)],
            Duration::from_secs(30),
        );
        router
            .tracker()
            .record_failure("a", ProviderErrorKind::Overloaded);

        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.provider_name, "b");
        assert_eq!(adapter.calls(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_restores_provider() {
        let (router, adapter) = router_with(
            vec![descriptor("a", 1), descriptor("b", 2)],
            Duration::from_millis(20),
        );
        adapter.set("a", Outcome::Fail(ProviderErrorKind::Timeout));
        adapter.set("b", Outcome::Fail(ProviderErrorKind::Timeout));
        let _ = router.generate_response(&msgs(), None).await;
        assert!(router.current_provider().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        adapter.set("a", Outcome::Reply("back"));
        adapter.clear_calls();
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.text, "back");
        assert_eq!(adapter.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_later_success_re_enables_all_providers() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Fail(ProviderErrorKind::Overloaded));
        adapter.set("2", Outcome::Fail(ProviderErrorKind::Overloaded));
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.provider_name, "3");
        assert!(!router.tracker().is_available("1"));
        assert!(!router.tracker().is_available("2"));

        // "3" succeeding in a later request clears the older exclusions
        adapter.clear_calls();
        router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(adapter.calls(), vec!["3"]);
        assert!(router.tracker().is_available("1"));
        assert!(router.tracker().is_available("2"));

        adapter.set("1", Outcome::Reply("one"));
        adapter.clear_calls();
        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.text, "one");
        assert_eq!(adapter.calls(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::RateLimited(Some(12.5)));

        let err = router.generate_response(&msgs(), None).await.unwrap_err();
        match err {
            RouterError::RateLimited {
                provider,
                rate_limit,
            } => {
                assert_eq!(provider, "1");
                assert_eq!(rate_limit.retry_after_seconds, Some(12.5));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(adapter.calls(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_rate_limited_provider_enters_cooldown() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::RateLimited(None));
        let _ = router.generate_response(&msgs(), None).await;
        assert!(!router.tracker().is_available("1"));
        assert_eq!(router.current_provider().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_exclude() {
        for kind in [
            ProviderErrorKind::AuthFailure,
            ProviderErrorKind::MalformedRequest,
        ] {
            let (router, adapter) = three();
            adapter.set("1", Outcome::Fail(kind));
            let resp = router.generate_response(&msgs(), None).await.unwrap();
            assert_eq!(resp.provider_name, "2");

            adapter.clear_calls();
            adapter.set("1", Outcome::Reply("fixed"));
            let resp = router.generate_response(&msgs(), None).await.unwrap();
            assert_eq!(resp.text, "fixed");
            assert_eq!(adapter.calls(), vec!["1"]);
        }
    }

    #[tokio::test]
    async fn test_pinned_model_uses_backend_model() {
        let (router, adapter) = three();
        let resp = router
            .generate_response(&msgs(), Some("pinned-2"))
            .await
            .unwrap();
        assert_eq!(resp.provider_name, "2");
        assert_eq!(resp.model, "two-large");
        assert_eq!(adapter.calls(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_pinned_failure_falls_back() {
        let (router, adapter) = three();
        adapter.set("2", Outcome::Fail(ProviderErrorKind::Overloaded));
        let resp = router
            .generate_response(&msgs(), Some("pinned-2"))
            .await
            .unwrap();
        assert_eq!(resp.provider_name, "1");
        assert_eq!(adapter.calls(), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_pinned_model_failure_retries_default_model() {
        let (router, adapter) = router_with(vec![descriptor("1", 1)], Duration::from_secs(30));
        adapter.set("one-large", Outcome::Fail(ProviderErrorKind::MalformedRequest));

        let resp = router
            .generate_response(&msgs(), Some("pinned-1-big"))
            .await
            .unwrap();
        assert_eq!(resp.provider_name, "1");
        assert_eq!(resp.model, "1-default");
        assert_eq!(adapter.calls(), vec!["1", "1"]);
        assert_eq!(adapter.models(), vec!["one-large", "1-default"]);
    }

    #[tokio::test]
    async fn test_pinned_default_model_not_called_twice() {
        let (router, adapter) = router_with(
            vec![descriptor("1", 1), descriptor("2", 2)],
            Duration::from_secs(30),
        );
        adapter.set("1", Outcome::Fail(ProviderErrorKind::MalformedRequest));

        let resp = router
            .generate_response(&msgs(), Some("pinned-1-default"))
            .await
            .unwrap();
        assert_eq!(resp.provider_name, "2");
        assert_eq!(adapter.calls(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_pinned_rate_limit_does_not_fall_back() {
        let (router, adapter) = three();
        adapter.set("2", Outcome::RateLimited(Some(30.0)));
        let err = router
            .generate_response(&msgs(), Some("pinned-2"))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after_seconds(), Some(30.0));
        assert_eq!(adapter.calls(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_unresolved_pins_use_automatic_selection() {
        let (router, adapter) = three();
        for pin in ["auto", "unknown-model", "pinned-off", "pinned-x"] {
            adapter.clear_calls();
            let resp = router.generate_response(&msgs(), Some(pin)).await.unwrap();
            assert_eq!(resp.provider_name, "1");
            assert_eq!(adapter.calls(), vec!["1"]);
        }
    }

    #[tokio::test]
    async fn test_timeout_fails_over_and_excludes() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Hang);
        adapter.set("2", Outcome::Reply("hello"));
        let router = router.with_attempt_timeout(Duration::from_millis(20));

        let resp = router.generate_response(&msgs(), None).await.unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.provider_name, "2");
        assert_eq!(adapter.calls(), vec!["1", "2"]);

        assert!(router.tracker().excluded_until("1").is_some());
        assert_eq!(router.provider_status().get("1"), Some(&false));
        assert_eq!(router.current_provider().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_single_provider_rate_limited() {
        let (router, adapter) = router_with(vec![descriptor("only", 1)], Duration::from_secs(30));
        adapter.set("only", Outcome::RateLimited(Some(12.5)));
        let err = router.generate_response(&msgs(), None).await.unwrap_err();
        assert!(matches!(err, RouterError::RateLimited { .. }));
        assert_eq!(err.retry_after_seconds(), Some(12.5));
        assert_eq!(adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_auth_failure_falls_back() {
        let (router, adapter) = router_with(
            vec![descriptor("x", 1), descriptor("y", 2)],
            Duration::from_secs(30),
        );
        adapter.set("x", Outcome::Fail(ProviderErrorKind::AuthFailure));
        adapter.set("y", Outcome::Reply("from y"));

        let resp = router
            .generate_response(&msgs(), Some("pinned-x"))
            .await
            .unwrap();
        assert_eq!(resp.text, "from y");
        // x is not retried inside the same request, and stays eligible
        assert_eq!(adapter.calls(), vec!["x", "y"]);
        assert!(router.tracker().is_available("x"));
        assert_eq!(router.current_provider().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_no_enabled_providers() {
        let off = ProviderDescriptor::new(
            "off",
            ProviderFamily::OpenAi,
            "",
            "https://example.com",
            "m",
            1,
        );
        let (router, adapter) = router_with(vec![off], Duration::from_secs(30));
        let err = router.generate_response(&msgs(), None).await.unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersUnavailable));
        assert!(adapter.calls().is_empty());
        assert_eq!(router.provider_status().get("off"), Some(&false));
        assert!(router.current_provider().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_failover() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Hang);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = router
            .generate_response_with_cancel(&msgs(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert_eq!(adapter.calls(), vec!["1"]);
        assert!(router.tracker().is_available("1"));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_calls() {
        let (router, adapter) = three();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = router
            .generate_response_with_cancel(&msgs(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let (router, _adapter) = three();
        router.tracker().record_failure("1", ProviderErrorKind::Overloaded);

        let status = router.provider_status();
        assert_eq!(status.get("1"), Some(&false));
        assert_eq!(status.get("2"), Some(&true));
        assert_eq!(router.current_provider().as_deref(), Some("2"));

        router.reset_availability();
        assert_eq!(router.current_provider().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_success_clears_exclusion_from_overlapping_request() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Slow("slow one", 40));
        let router = Arc::new(router);

        let in_flight = {
            let router = router.clone();
            tokio::spawn(async move { router.generate_response(&msgs(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // A concurrent request sees "2" fail while "1" is still answering
        router
            .tracker()
            .record_failure("2", ProviderErrorKind::Overloaded);
        assert!(!router.tracker().is_available("2"));

        let resp = in_flight.await.unwrap().unwrap();
        assert_eq!(resp.text, "slow one");
        assert!(router.tracker().is_available("2"));
    }

    #[test]
    fn test_next_pending_skips_tried_and_rejected() {
        let all = vec![
            descriptor("1", 1),
            descriptor("2", 2),
            descriptor("3", 3),
            descriptor("4", 4),
        ];
        let refs: Vec<&ProviderDescriptor> = all.iter().collect();
        let mut state = RequestState::new();
        state.record_call("2", "2-default");
        state.record_failure("3", ProviderErrorKind::AuthFailure);

        assert_eq!(state.next_pending(&refs[1..]).map(|p| p.name()), Some("4"));
        assert_eq!(state.next_pending(&refs[..1]).map(|p| p.name()), Some("1"));
        assert!(state.next_pending(&refs[1..3]).is_none());
        // A different model on the same provider does not count as tried
        state.record_call("4", "four-large");
        assert_eq!(state.next_pending(&refs[3..]).map(|p| p.name()), Some("4"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_tracker() {
        let (router, adapter) = three();
        adapter.set("1", Outcome::Fail(ProviderErrorKind::Overloaded));
        adapter.set("2", Outcome::Fail(ProviderErrorKind::Overloaded));
        let router = Arc::new(router);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                router.generate_response(&msgs(), None).await
            }));
        }
        for handle in handles {
            let resp = handle.await.unwrap().unwrap();
            assert_eq!(resp.provider_name, "3");
        }
    }

    #[test]
    fn test_new_from_registry() {
        let registry = ProviderRegistry::from_lookup(|var| match var {
            "GROQ_API_KEY" => Some("gsk_test".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();
        let client = crate::providers::build_http_client(Duration::from_secs(5)).unwrap();
        let router = Router::new(
            &registry,
            crate::catalog::default_catalog(),
            Arc::new(AvailabilityTracker::default()),
            client,
        );

        let names: Vec<&str> = router.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["groq", "openai"]);
        let status = router.provider_status();
        assert_eq!(status.len(), 5);
        assert_eq!(status.get("gemini"), Some(&false));
        assert_eq!(router.current_provider().as_deref(), Some("groq"));
    }
}

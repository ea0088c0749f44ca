//! Per-provider cooldown tracking
//!
//! A provider that fails with a transient error is excluded from automatic
//! selection until its cooldown elapses. Expiry is evaluated lazily against
//! the request time, so there are no timers to manage. A successful call
//! clears every exclusion except those of providers that failed earlier in
//! the same request.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ProviderErrorKind;
use crate::registry::ProviderDescriptor;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Mutable availability record for one provider
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailabilityState {
    pub excluded_until: Option<Instant>,
}

impl AvailabilityState {
    fn is_excluded_at(&self, now: Instant) -> bool {
        self.excluded_until.is_some_and(|until| until > now)
    }
}

/// Shared exclusion state. Wrap in `Arc` to share between routers.
#[derive(Debug)]
pub struct AvailabilityTracker {
    cooldown: Duration,
    states: Mutex<HashMap<String, AvailabilityState>>,
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl AvailabilityTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AvailabilityState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Availability mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Providers whose exclusion window has expired, in the given order
    pub fn candidates<'a>(
        &self,
        providers: &'a [ProviderDescriptor],
    ) -> Vec<&'a ProviderDescriptor> {
        self.candidates_at(providers, Instant::now())
    }

    pub fn candidates_at<'a>(
        &self,
        providers: &'a [ProviderDescriptor],
        now: Instant,
    ) -> Vec<&'a ProviderDescriptor> {
        let mut states = self.lock();
        states.retain(|name, state| {
            let keep = state.is_excluded_at(now);
            if !keep {
                debug!("Cooldown expired for provider {}", name);
            }
            keep
        });
        providers
            .iter()
            .filter(|p| !states.contains_key(p.name()))
            .collect()
    }

    /// Record a failed call. Only transient kinds start a cooldown.
    pub fn record_failure(&self, provider: &str, kind: ProviderErrorKind) {
        self.record_failure_at(provider, kind, Instant::now());
    }

    pub fn record_failure_at(&self, provider: &str, kind: ProviderErrorKind, now: Instant) {
        if !kind.is_transient() {
            debug!("Provider {} failed with {}, not excluding", provider, kind);
            return;
        }
        let until = now + self.cooldown;
        self.lock().insert(
            provider.to_string(),
            AvailabilityState {
                excluded_until: Some(until),
            },
        );
        info!(
            "Excluding provider {} for {:?} after {}",
            provider, self.cooldown, kind
        );
    }

    /// Record a successful call. Clears the exclusion of every provider.
    pub fn record_success(&self, provider: &str) {
        let mut states = self.lock();
        if !states.is_empty() {
            info!(
                "Provider {} succeeded, re-enabling {} excluded provider(s)",
                provider,
                states.len()
            );
            states.clear();
        }
    }

    /// Record a successful call made by a request in which the providers
    /// in `failed_in_request` already failed. Clears every other exclusion,
    /// including ones set by concurrent requests; the request's own failed
    /// providers keep their cooldown.
    pub fn record_success_for_request(&self, provider: &str, failed_in_request: &[&str]) {
        if failed_in_request.is_empty() {
            self.record_success(provider);
            return;
        }
        let mut states = self.lock();
        let before = states.len();
        states.retain(|name, _| failed_in_request.contains(&name.as_str()));
        let cleared = before - states.len();
        if cleared > 0 {
            info!(
                "Provider {} succeeded, re-enabling {} excluded provider(s)",
                provider, cleared
            );
        }
    }

    /// Clear all exclusions
    pub fn reset(&self) {
        self.lock().clear();
        info!("Availability state reset");
    }

    pub fn is_available(&self, provider: &str) -> bool {
        self.is_available_at(provider, Instant::now())
    }

    pub fn is_available_at(&self, provider: &str, now: Instant) -> bool {
        self.lock()
            .get(provider)
            .is_none_or(|state| !state.is_excluded_at(now))
    }

    pub fn excluded_until(&self, provider: &str) -> Option<Instant> {
        self.lock().get(provider).and_then(|s| s.excluded_until)
    }

    /// Remaining cooldown for every currently excluded provider
    pub fn exclusions(&self) -> BTreeMap<String, Duration> {
        self.exclusions_at(Instant::now())
    }

    pub fn exclusions_at(&self, now: Instant) -> BTreeMap<String, Duration> {
        self.lock()
            .iter()
            .filter_map(|(name, state)| {
                state
                    .excluded_until
                    .filter(|until| *until > now)
                    .map(|until| (name.clone(), until - now))
            })
            .collect()
    }
}

//! switchboard-core - Multi-provider LLM routing with automatic failover
//!
//! This crate provides:
//! - Canonical chat request/response types shared by every backend
//! - Provider adapters for OpenAI-style, Gemini and Hugging Face APIs
//! - A canonical error taxonomy with per-adapter classification
//! - Cooldown-based availability tracking for failing providers
//! - A model catalog for pinning requests to a specific model
//! - The router that ties them together

pub mod availability;
pub mod catalog;
pub mod error;
pub mod providers;
pub mod registry;
pub mod router;
pub mod types;

// Re-export main types for convenience
pub use availability::{AvailabilityTracker, DEFAULT_COOLDOWN};
pub use catalog::{AUTO_MODEL_ID, ModelCatalog, ModelCatalogEntry, default_catalog};
pub use error::{ProviderError, ProviderErrorKind, RouterError};
pub use providers::{ProviderAdapter, build_http_client};
pub use registry::{ProviderDescriptor, ProviderFamily, ProviderRegistry, mask_secret};
pub use router::{DEFAULT_ATTEMPT_TIMEOUT, Router};
pub use types::{CanonicalResponse, ChatMessage, ChatRole, RateLimitInfo, TokenUsage};

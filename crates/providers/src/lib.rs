//! Model provider implementations for Stepwise.
//!
//! All providers implement the `stepwise_core::Provider` trait. The router
//! builds them from configuration; [`AdvisedProvider`] wraps any of them in an
//! [`AdvisorChain`].

pub mod advised;
pub mod advisor;
pub mod openai_compat;
pub mod router;

pub use advised::AdvisedProvider;
pub use advisor::{Advisor, AdvisorChain, LoggerAdvisor, ReReadingAdvisor, StreamAdvisor};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};

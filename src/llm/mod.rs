//! Two-tier LLM routing with one shared invocation contract.
//!
//! `policy` owns the invocation ladder (budget → pricing → retries →
//! failover → usage); `guardrails` owns safety shaping; `tier1`/`tier2`
//! own their schema contracts. Nothing here applies a delta — impacts are
//! routed to the trend engine by the pipeline after taxonomy checks.

pub mod budget;
pub mod guardrails;
pub mod policy;
pub mod provider;
pub mod tier1;
pub mod tier2;

pub use budget::BudgetGuard;
pub use policy::LlmPolicy;
pub use provider::{ChatClient, LlmCallOutput};
pub use tier1::{Tier1Filter, Tier1Item, Tier1Trend, Tier1Verdict};
pub use tier2::{Impact, Tier2Extraction, Tier2Extractor};

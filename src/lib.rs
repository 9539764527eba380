//! Budget-governed AI content generation pipeline.
//!
//! # Architecture
//! - [`budget`]: cost ledger, budget governor and model pricing
//! - [`ai`]: provider adapters (chat, image, search) behind one gateway
//! - [`cache`]: similarity-based content reuse in front of the gateway
//! - [`jobs`]: job kinds, retry policies, scheduler and fan-out graph
//! - [`domain`]: repository and publishing collaborators
//! - [`api`]: HTTP surface for job submission and cost reporting
//!
//! # Design Principles
//! - Every successful AI call records exactly one cost event
//! - Budget limits gate calls before any network traffic
//! - Retry policy lives with the job, not with the provider adapter

pub mod ai;
pub mod api;
pub mod budget;
pub mod cache;
pub mod config;
pub mod domain;
pub mod jobs;

pub use config::Config;

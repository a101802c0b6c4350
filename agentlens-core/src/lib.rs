//! # agentlens-core
//!
//! Core library for agentlens - a live metrics pipeline for AI coding agent
//! session logs.
//!
//! This library provides:
//! - A canonical event model normalizing three provider log formats
//! - An incremental line parser tolerant of chunked, dirty input
//! - A noise classifier for display filtering
//! - Bounded trackers (frequency counter, activity heatmap)
//! - A stateful aggregator producing a continuously-updated metrics snapshot
//! - Versioned snapshot persistence for crash/restart resumption
//!
//! ## Architecture
//!
//! Data flows through one push-based pipeline per monitored session:
//! - **Raw:** provider JSONL bytes, delivered in arbitrary chunks
//! - **Canonical:** provider-agnostic events with stable correlation ids
//! - **Derived:** the [`AggregatedMetrics`](aggregate::AggregatedMetrics)
//!   snapshot, queryable at any time
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentlens_core::ingest::SessionPipeline;
//! use agentlens_core::{PipelineConfig, Provider};
//!
//! let mut pipeline = SessionPipeline::new(Provider::ClaudeCode, PipelineConfig::default());
//! pipeline.feed(b"{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\n");
//! pipeline.flush();
//! println!("{} events", pipeline.metrics().counts.total_events);
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{AggregatedMetrics, EventAggregator};
pub use config::{Config, PipelineConfig};
pub use error::{Error, Result};
pub use event::{CanonicalEvent, ContentBlock, EventKind, Provider, Role, TokenUsage};
pub use ingest::SessionPipeline;

// Public modules
pub mod aggregate;
pub mod classify;
pub mod config;
pub mod discover;
pub mod error;
pub mod event;
pub mod ingest;
pub mod logging;
pub mod snapshot;
pub mod trackers;

//! Ingestion pipeline
//!
//! This module wires the incremental line parser, the provider normalizer,
//! the noise classifier, and the event aggregator into one push-based
//! pipeline per monitored session.
//!
//! ## Architecture
//!
//! ```text
//! raw bytes ──► LineParser ──► ProviderNormalizer ──► classify ──► EventAggregator
//!   (chunks)      (objects)      (canonical events)    (annotate)     (metrics)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentlens_core::ingest::SessionPipeline;
//! use agentlens_core::{PipelineConfig, Provider};
//!
//! let mut pipeline = SessionPipeline::new(Provider::ClaudeCode, PipelineConfig::default());
//! pipeline.feed(chunk);          // repeat as bytes arrive
//! pipeline.flush();              // at end of stream
//! let metrics = pipeline.metrics();
//! ```

pub mod line_parser;
pub mod normalizer;
pub mod normalizers;

pub use line_parser::LineParser;
pub use normalizer::{
    canonical_tool_name, create_normalizer, join_text_parts, parse_timestamp, recover_arguments,
    PendingCall, PendingCalls, ProviderNormalizer, GENERIC_SUMMARY,
};

use crate::aggregate::{AggregatedMetrics, EventAggregator};
use crate::classify::{classify, is_hard_noise, soft_noise_reason, MessageClass, SoftNoiseReason};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::event::{CanonicalEvent, Provider};
use std::io::Read;
use std::path::Path;

/// Read granularity for whole-file replay.
const REPLAY_CHUNK_BYTES: usize = 64 * 1024;

/// One canonical event plus its classification, as delivered to a live
/// display sink.
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedEvent<'a> {
    pub event: &'a CanonicalEvent,
    pub hard_noise: bool,
    pub soft_noise: Option<SoftNoiseReason>,
    pub class: MessageClass,
}

/// Counters describing one pipeline run, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub lines_parsed: u64,
    pub lines_skipped: u64,
    pub events_emitted: u64,
    pub hard_noise_events: u64,
}

/// One ingestion pipeline per monitored session.
///
/// Single-writer: callers serialize `feed()`/`flush()` calls; one pipeline
/// task per session is the expected deployment shape.
pub struct SessionPipeline {
    provider: Provider,
    line_parser: LineParser,
    normalizer: Box<dyn ProviderNormalizer>,
    aggregator: EventAggregator,
    events_emitted: u64,
}

impl SessionPipeline {
    /// Create a pipeline for a provider with an empty aggregator.
    pub fn new(provider: Provider, config: PipelineConfig) -> Self {
        let normalizer = create_normalizer(provider, config.max_pending_calls);
        let aggregator = EventAggregator::new(config);
        Self {
            provider,
            line_parser: LineParser::new(),
            normalizer,
            aggregator,
            events_emitted: 0,
        }
    }

    /// Create a pipeline around a restored aggregator (crash resumption).
    pub fn with_aggregator(
        provider: Provider,
        config: PipelineConfig,
        aggregator: EventAggregator,
    ) -> Self {
        let normalizer = create_normalizer(provider, config.max_pending_calls);
        Self {
            provider,
            line_parser: LineParser::new(),
            normalizer,
            aggregator,
            events_emitted: 0,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Feed the next chunk of raw bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.feed_with_sink(chunk, |_| {});
    }

    /// Feed the next chunk, delivering each classified canonical event to
    /// `sink` for live display.
    pub fn feed_with_sink<F>(&mut self, chunk: &[u8], mut sink: F)
    where
        F: FnMut(ClassifiedEvent),
    {
        let Self {
            line_parser,
            normalizer,
            aggregator,
            events_emitted,
            ..
        } = self;

        line_parser.feed(chunk, &mut |_line, value| {
            for event in normalizer.convert(&value) {
                *events_emitted += 1;
                aggregator.ingest(&event);
                sink(ClassifiedEvent {
                    event: &event,
                    hard_noise: is_hard_noise(&event),
                    soft_noise: soft_noise_reason(&event),
                    class: classify(&event),
                });
            }
        });
    }

    /// Force processing of any trailing unterminated line.
    pub fn flush(&mut self) {
        let Self {
            line_parser,
            normalizer,
            aggregator,
            events_emitted,
            ..
        } = self;

        line_parser.flush(&mut |_line, value| {
            for event in normalizer.convert(&value) {
                *events_emitted += 1;
                aggregator.ingest(&event);
            }
        });
    }

    /// Replay a complete session file from a cold start.
    pub fn replay_file(&mut self, path: &Path) -> Result<PipelineReport> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = vec![0u8; REPLAY_CHUNK_BYTES];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.feed(&buf[..n]);
        }
        self.flush();
        Ok(self.report())
    }

    /// Clear per-session parser and normalizer state without discarding the
    /// aggregator; required when switching the input file.
    pub fn reset(&mut self) {
        self.line_parser.reset();
        self.normalizer.reset();
        self.events_emitted = 0;
    }

    /// The current metrics snapshot.
    pub fn metrics(&self) -> &AggregatedMetrics {
        self.aggregator.metrics()
    }

    /// The aggregator, for snapshot serialization and richer accessors.
    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    /// Tool calls the normalizer has seen a begin for but no end.
    pub fn in_flight(&self) -> Vec<PendingCall> {
        self.normalizer.in_flight()
    }

    /// Counters for this pipeline run.
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            lines_parsed: self.line_parser.lines_parsed(),
            lines_skipped: self.line_parser.lines_skipped(),
            events_emitted: self.events_emitted,
            hard_noise_events: self.metrics().counts.hard_noise_events,
        }
    }
}

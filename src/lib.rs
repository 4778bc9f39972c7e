//! Internals of the `llamascan` reconnaissance tool.
//!
//! llamascan discovers hosts exposing a TCP service by driving the external
//! [masscan](https://github.com/robertdavidgraham/masscan) scanner, then
//! probes every discovered host over HTTP to confirm and fingerprint an
//! exposed [Ollama](https://ollama.com) API server.
//!
//! ## Architecture Overview
//!
//! Data flows one direction through a two-stage pipeline:
//!
//! 1. **Discovery**: [`scan::ScanStream`] launches masscan and incrementally
//!    parses its list output into [`scan::Host`] values as the scan runs,
//!    never waiting for the subprocess to finish.
//! 2. **Investigation**: [`engine::InvestigationEngine`] accepts hosts as
//!    they are discovered and fingerprints each one with
//!    [`probe::ProbeClient`], holding the number of in-flight HTTP probes
//!    under a hard cap so a discovery burst cannot exhaust file descriptors.
//!
//! Scan-level failures (missing binary, insufficient privileges) terminate
//! discovery with a typed [`scan::ScanError`]; per-host probe failures are
//! absorbed as non-matches and never fail the batch.
//!
//! ## Basic Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use llamascan::engine::InvestigationEngine;
//! use llamascan::probe::ProbeClient;
//! use llamascan::scan::{OnLimit, ScanConfig, ScanStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig {
//!         range: "192.0.2.0/24".to_owned(),
//!         port: 11434,
//!         max_rate: 10_000,
//!         exclude_file: "exclude.conf".into(),
//!         limit: Some(100),
//!         on_limit: OnLimit::Kill,
//!     };
//!
//!     let prober = Arc::new(ProbeClient::new(Duration::from_millis(1_500))?);
//!     let mut engine = InvestigationEngine::new(prober, 1_000);
//!     engine.start()?;
//!
//!     let mut stream = ScanStream::spawn(&config)?;
//!     while let Some(host) = stream.next_host().await? {
//!         engine.add_host(host)?;
//!         for instance in engine.drain() {
//!             println!("{}:{} runs Ollama {}", instance.address, instance.port, instance.version);
//!         }
//!     }
//!
//!     engine.stop().await;
//!     for instance in engine.drain() {
//!         println!("{}:{} runs Ollama {}", instance.address, instance.port, instance.version);
//!     }
//!     Ok(())
//! }
//! ```

pub mod engine;

pub mod input;

pub mod probe;

pub mod scan;

pub mod tui;

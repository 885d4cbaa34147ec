//! # fabricbench - Data-center fabric emulation and concurrent throughput benchmarks
//!
//! Builds small data-center fabrics (linear, star, dual-star, redundant ring,
//! spine-leaf, or custom shapes) on an emulation platform, waits for the
//! loop-prevention protocol where the fabric has redundant paths, then drives
//! concurrent iperf flows across it and aggregates their throughput.
//!
//! ## Architecture
//!
//! - `topology`: descriptors, built-in shapes, validation and the builder
//! - `platform`: the `Platform` trait with a Linux namespace backend and an
//!   in-process simulated backend
//! - `convergence`: fixed or polling wait for loop prevention
//! - `bench`: flow specs, the concurrent harness and built-in scenarios
//! - `analysis`: throughput parsing, aggregation and report rendering
//! - `config` / `config_loader`: YAML configuration
//! - `orchestrator`: one full run, teardown included
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fabricbench::{config::Config, orchestrator, platform::SimulatedPlatform, topology::Shape};
//!
//! # async fn demo() -> color_eyre::Result<()> {
//! let config = Config::for_shape(Shape::SpineLeaf);
//! let platform = Arc::new(SimulatedPlatform::default());
//! let report = orchestrator::run(&config, platform, Default::default()).await?;
//! println!("{}", fabricbench::analysis::render_text(&report));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! general:
//!   log_level: info
//!   json_report: report.json
//! topology:
//!   shape: spine-leaf      # or custom: { name, nodes, links }
//! convergence:
//!   mode: poll             # fixed | poll
//!   max_wait: 60s
//! harness:
//!   generator: iperf
//!   timeout_margin: 15s
//! scenarios:
//!   - name: Balanced load
//!     duration: 30s
//!     flows:
//!       - { client: h1, server: h4, transport: datagram }
//! ```

pub mod analysis;
pub mod bench;
pub mod config;
pub mod config_loader;
pub mod convergence;
pub mod orchestrator;
pub mod platform;
pub mod topology;

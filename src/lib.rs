//! # Capture Sieve
//!
//! Incremental ingestion and classification of capture-device image batches.
//!
//! Capture devices drop dated batch directories onto a remote store. Each run
//! picks up the batches that arrived since the last one, gives their files a
//! stable sequence, asks a vision model whether each image matches a prompt,
//! publishes the matches next to the raw captures, and advances a durable
//! per-source watermark so no batch is processed twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ Remote store │──▶│ Discovery  │──▶│ Sequencer  │──▶│   Stage    │
//! │ (FsRemote)   │   │ watermark  │   │ rename     │   │ raw/m/u    │
//! └──────▲───────┘   └────────────┘   └────────────┘   └─────┬──────┘
//!        │                                                   ▼
//!  ┌─────┴──────┐   ┌────────────┐                    ┌────────────┐
//!  │ Checkpoint │◀──│ Publisher  │◀───────────────────│   Runner   │──▶ Classifier
//!  └────────────┘   └────────────┘                    └────────────┘    (Gemini)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sieve status                      # watermarks and override queues
//! sieve run --dry-run               # batches the next run would take
//! GEMINI_API_KEY=... sieve run      # process, publish, commit, report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`remote`] | Remote store traits and session |
//! | [`remote_fs`] | Filesystem-backed remote store |
//! | [`layout`] | Remote directory layout and raw file filter |
//! | [`checkpoint`] | Durable watermarks and override queues |
//! | [`discovery`] | Batch selection |
//! | [`sequencer`] | In-place raw file sequencing |
//! | [`stage`] | Local stage areas |
//! | [`classify`] | Classifier trait, verdict rules, Gemini adapter |
//! | [`pacing`] | Fixed-interval call pacing |
//! | [`runner`] | Batch classification |
//! | [`publish`] | Publishing matches |
//! | [`report`] | Run report rendering and delivery |
//! | [`progress`] | Progress reporting |
//! | [`pipeline`] | Run orchestration, dry run and status |

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod models;
pub mod pacing;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod remote;
pub mod remote_fs;
pub mod report;
pub mod runner;
pub mod sequencer;
pub mod stage;

//! Confession Bot - republishes numbered confession posts as image cards.
//!
//! Each run reads the newest posts of a public page, keeps the ones in the
//! numbered confession format, draws their text onto a fixed-width card and
//! posts the card with a link back to the original. Handled post ids are kept
//! in a small state file so nothing is posted twice, even across restarts.
//!
//! # Core Components
//!
//! * [`config`] - Configuration from environment variables
//! * [`state`] - Durable set of handled post ids
//! * [`source`] - Upstream page reader
//! * [`classifier`] - Confession format check
//! * [`renderer`] - Text to PNG card
//! * [`publisher`] - Destination platform client
//! * [`pipeline`] - One run: fetch, filter, classify, render, publish, record
//! * [`trigger`] - Entry points used by the CLI: run once, read logs
//! * [`error`] - Error taxonomy
//!
//! # Quick Start
//!
//! ```no_run
//! use confession_bot::*;
//!
//! let config = Config::load()?;
//! let reply = trigger::run_update(&config);
//! assert_eq!(reply, "The bot was updated!");
//! # Ok::<(), confession_bot::error::ConfigError>(())
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod oauth;
pub mod pipeline;
pub mod publisher;
pub mod renderer;
pub mod source;
pub mod state;
pub mod trigger;

// Re-export commonly used types for convenience
pub use classifier::is_confession;
pub use config::Config;
pub use error::BotError;
pub use pipeline::{Pipeline, PipelineSettings, RunOutcome, RunReport, RunState};
pub use publisher::{Credentials, Publisher, TwitterPublisher};
pub use renderer::{ConfessionRenderer, ImageRenderer, RenderedImage};
pub use source::{FacebookSource, Post, PostSource};
pub use state::StateStore;

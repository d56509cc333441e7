//! PiDash Service: fallback resolution and the process context.
//!
//! This crate builds on `pidash-core` to provide:
//! - `FallbackResolver`: remote → CSV → database → last good → placeholder
//! - `DashboardConfig`: TOML configuration with environment overrides
//! - `AppContext`: the single cache + resolver shared by request handlers
//! - Tracing subscriber initialization

pub mod config;
pub mod context;
pub mod fallback;
pub mod logging;

pub use config::{ConfigError, DashboardConfig};
pub use context::AppContext;
pub use fallback::{Collaborators, FallbackResolver, FallbackStatus, ResolverSettings};

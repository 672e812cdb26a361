//! # crm-config
//!
//! Layered settings for the CRM core and the tracing setup that goes with them.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional TOML file (`crm.toml`, or the path in `CRM_CONFIG`)
//! 3. environment variables prefixed `CRM__`, nested with `__`
//!    (e.g. `CRM__DISPATCH__BATCH_SIZE=20`, `CRM__DATABASE__URL=sqlite://crm.db`)
//!
//! A `.env` file is read first if present, so it can feed step 3.

pub mod settings;
pub mod telemetry;

pub use settings::*;
pub use telemetry::init_tracing;

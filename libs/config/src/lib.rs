//! # Client Configuration
//!
//! Layered settings for messaging clients and the tracing setup they share.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use client_config::{logging, ClientConfig};
//!
//! let config = ClientConfig::load(None).expect("configuration");
//! logging::init_tracing(&config.log_level);
//! let params = config.connect_params();
//! assert_eq!(params.peer_group, config.peer_group);
//! ```

pub mod client_config;
pub mod logging;
pub mod paths;

// Re-export commonly used types
pub use client_config::{ClientConfig, DEFAULT_MASTER_ADDRESS, DEFAULT_PEER_GROUP, ENV_PREFIX};

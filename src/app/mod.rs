//! Application core module
//!
//! Configuration shared by the library and the `ascan` binary.

mod config;

pub use config::{AntiCsrfParam, Config, ConnectionParam};

//! Ancarna active scan engine
//!
//! Runs attack plugins against the request templates of a site tree, one
//! scheduler per host, with every parameter reachable through a `Variant`.

pub mod app;
pub mod error;
pub mod http;
pub mod scanner;
pub mod site;

pub use error::{AscanError, ConfigError, HttpError, ScannerError};

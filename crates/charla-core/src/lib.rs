//! Shared foundation for the charla gateway: configuration, the privacy
//! utility, and the role/status vocabulary used by every other crate.

pub mod config;
pub mod error;
pub mod privacy;
pub mod types;

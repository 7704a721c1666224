// src/config/mod.rs
pub mod atf;

pub use atf::{AtfConfig, SignerConfig};

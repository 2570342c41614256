//! Core types, config, errors, and live settings for chatvoz.

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

//! Voicebridge Core
//!
//! Pure domain logic shared by the API service: tenant agent settings,
//! system-prompt construction, transcript delta accumulation, caption
//! merging for persistence, and the tool-executor contract. Nothing in
//! this crate performs I/O.

pub mod caption;
pub mod prompt;
pub mod settings;
pub mod tools;
pub mod transcript;

//! Voicebridge API Library Crate
//!
//! This library contains all the core logic for the voicebridge
//! service: application state, database access, REST handlers, the
//! browser and telephony WebSocket bridges, the Gemini Live protocol
//! client, and routing. The `api` binary is a thin wrapper around it.

pub mod audio;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;

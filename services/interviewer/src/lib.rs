//! Narra Interviewer Service
//!
//! The web service around `narra-core`: configuration, the WebSocket rooms participants
//! join, the OpenAI realtime model adapter, progress storage in PostgreSQL, and the HTTP
//! API. The `interviewer` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod router;
pub mod state;
pub mod ws;

//! Narra Interview Core
//!
//! Everything with state and sequencing in the interviewer: the question bank, the
//! per-participant progress store, the session builder that seeds the conversational
//! model, the turn coordinator that runs a live session, and the orchestrator that ties
//! them together for each participant who joins.

pub mod chat;
pub mod coordinator;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod question;
pub mod session;
pub mod transcript;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

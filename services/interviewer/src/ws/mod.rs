//! WebSocket Rooms
//!
//! Each client WebSocket is one room with one participant:
//!
//! - `protocol`: the JSON message format between client and server.
//! - `room`: the `Room`/`Participant` implementation the interview job runs against.
//! - `session`: the connection lifecycle, from upgrade to close.

pub mod protocol;
pub mod room;
pub mod session;

pub use session::ws_handler;

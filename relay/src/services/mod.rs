//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room bookkeeping so the route handler can stay
//! focused on socket plumbing and frame decoding.

pub mod room;

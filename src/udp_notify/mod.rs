//! UDP subscribe/notify service.
//!
//! Clients send `SUBSCRIBE` or `UNSUBSCRIBE` datagrams (trimmed,
//! case-insensitive). Administrative broadcasts reach every subscriber as
//! `{"type":"notification","message":...,"timestamp":...}`.

mod server;

pub use server::{BroadcastReport, ControlMessage, NotifyServer};

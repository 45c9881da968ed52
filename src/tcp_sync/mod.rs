//! TCP push stream for reading-progress updates.
//!
//! Clients connect and receive one JSON `ProgressUpdate` per line. Anything a
//! client sends is read and discarded; the read side only detects when the
//! peer goes away.

mod server;

pub use server::{ClientRegistry, DeliveryReport, PushStreamServer};

//! Interactive chat hub over WebSocket.
//!
//! One authority loop ([`ChatHub`]) owns the registry of open connections.
//! Each connection runs a reader that forwards decoded chat messages to the
//! hub and a writer that drains the connection's bounded outbound queue and
//! sends keepalive pings. A connection whose queue is full when a message is
//! fanned out is evicted instead of holding up the others.

mod handler;
mod hub;

pub use handler::{ws_handler, WsQuery};
pub use hub::{
    ChatHub, ClientLink, CloseReason, ConnectionId, ConnectionState, HubError, HubHandle,
    HubStats, OutboundReceiver,
};

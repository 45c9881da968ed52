use std::sync::Arc;
use std::time::Instant;

use crate::bridge::EventBridge;
use crate::config::Settings;
use crate::error::Result;
use crate::tcp_sync::{ClientRegistry, PushStreamServer};
use crate::udp_notify::NotifyServer;
use crate::websocket::{ChatHub, HubHandle};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub bridge: EventBridge,
    pub push_registry: Arc<ClientRegistry>,
    pub notify: Arc<NotifyServer>,
    pub hub: HubHandle,
    pub start_time: Instant,
}

impl AppState {
    /// Validate the settings, bind the TCP and UDP transports and start the
    /// chat hub.
    ///
    /// The push-stream server is returned separately because its loops own
    /// the listener and the bridge receiver; the caller spawns `run()`.
    pub async fn bind(settings: Settings) -> Result<(Self, PushStreamServer)> {
        settings.validate()?;

        let (bridge, bridge_rx) = EventBridge::new(settings.bridge.capacity);
        let push_stream = PushStreamServer::bind(&settings.tcp, bridge_rx).await?;
        let notify = NotifyServer::bind(&settings.udp).await?;
        let hub = ChatHub::spawn(&settings.websocket);

        let state = Self {
            push_registry: push_stream.registry(),
            settings: Arc::new(settings),
            bridge,
            notify,
            hub,
            start_time: Instant::now(),
        };

        Ok((state, push_stream))
    }
}

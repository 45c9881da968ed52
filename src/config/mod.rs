mod settings;

pub use settings::{
    ApiConfig, BridgeConfig, LogConfig, LogFormat, ServerConfig, Settings, TcpConfig, UdpConfig,
    WebSocketConfig,
};

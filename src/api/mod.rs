//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod routes;
mod triggers;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, trigger_routes};
pub use triggers::{notify_subscribers, submit_progress, NotifyRequest, ProgressRequest};

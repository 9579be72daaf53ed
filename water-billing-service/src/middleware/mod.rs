pub mod actor;
pub mod metrics;

pub use actor::require_admin;
pub use metrics::http_metrics_middleware;

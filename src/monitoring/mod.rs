//! Model performance and drift monitoring

pub mod drift;
pub mod model_monitor;

pub use model_monitor::{
    DriftState, HealthStatus, ModelMetrics, ModelMonitor, MonitorConfig, MonitorPhase,
};

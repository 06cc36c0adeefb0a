//! Connection supervision: keep-alive, reconnect backoff, host failover.

pub mod backoff;
pub mod health;
pub mod wake;

pub use backoff::{connecting_timeout, exponential_backoff, with_jitter};
pub use health::{HealthMonitor, MonitorConfig};
pub use wake::{wake_channel, WakeReceiver, WakeSignal};

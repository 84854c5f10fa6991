mod prober;
mod publisher;
mod checker;

pub use prober::{HttpProber, Prober, TcpProber};
pub use publisher::{ChannelPublisher, HttpPublisher, LogPublisher, StatusPublisher};
pub use checker::{CycleReport, HealthChecker, HealthConfig};

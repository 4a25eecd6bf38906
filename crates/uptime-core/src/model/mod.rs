pub mod channel;
pub mod check;
pub mod heartbeat;
pub mod incident;
pub mod maintenance;
pub mod monitor;

pub use channel::NotificationChannel;
pub use check::{CheckResult, CheckRing, CheckStatus};
pub use heartbeat::Heartbeat;
pub use incident::{Incident, IncidentEvent, IncidentEventKind, IncidentState};
pub use maintenance::{MaintenanceWindow, Schedule};
pub use monitor::{Monitor, MonitorStatus, ProbeKind, Status};

#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod probe;
pub mod store;

pub use config::{AdaptiveConfig, DispatchConfig, EngineConfig};
pub use engine::{ContentChange, Engine, Evaluation, Transition};
pub use error::EngineError;
pub use model::{
    CheckResult, CheckStatus, Heartbeat, Incident, IncidentEvent, IncidentEventKind,
    IncidentState, MaintenanceWindow, Monitor, MonitorStatus, NotificationChannel, ProbeKind,
    Schedule, Status,
};
pub use notify::{
    DeliveryReport, DispatchError, DispatchHandle, Dispatcher, EventType, Payload, SendError,
    Sender, SenderRegistry,
};
pub use probe::{HttpProbe, Probe, ProbeError, ProbeOutcome, ProbeRegistry, TcpProbe};
pub use store::{MemoryStore, Store, StoreError};

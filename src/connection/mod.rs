/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Connection lifecycle: state machine, liveness, quality, backoff and listeners.

mod config;
mod driver;
mod heartbeat;
mod listener;
mod management;
mod metrics;
mod quality;
mod reconnect;
mod timer;

pub use self::config::{ChannelConfig, HeartbeatConfig, QueueConfig, ReconnectionConfig};
pub use self::heartbeat::{HeartbeatMonitor, Probe, TickDecision, TimeoutOutcome};
pub use self::listener::{
    ChannelConnectionListener, ConnectionEvent, ConnectionListener, DropReason, InboundMessage,
    ListenerHandle, ListenerRegistry, StatusUpdate,
};
pub use self::management::{ConnectionManager, ConnectionState, Diagnostics, SendStatus};
pub use self::metrics::{ConnectionMetrics, INITIAL_HEALTH_SCORE};
pub use self::quality::{
    Assessment, AssessmentContext, NetworkClass, PREEMPTIVE_RECONNECT_THRESHOLD, QualityAssessor,
    QualityGrade,
};
pub use self::reconnect::{ReconnectionStrategist, RetryPlan};

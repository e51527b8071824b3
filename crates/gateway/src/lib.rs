//! Gateway wiring for the scheduling core.
//!
//! Builds the lane scheduler from config, routes inbound messages through the
//! queue policy into agent runs or followup queues, and runs the periodic
//! maintenance sweep and graceful shutdown.

pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod limits;
pub mod maintenance;
pub mod runner;

pub use {
    dispatcher::{DispatchOutcome, Dispatcher, DropReason},
    error::{Error, Result},
    gateway::{Gateway, QueueStatus, ShutdownReport},
    limits::{LaneLimits, apply_gateway_lane_concurrency, build_command_queue, command_queue_config},
    maintenance::{
        MaintenanceReport, StuckQueue, maintenance_interval, run_maintenance_sweep,
        spawn_maintenance,
    },
    runner::{AgentRequest, AgentRunner, InboundMessage, NoopAgentRunner},
};

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Cooldown orchestration core (hardware-agnostic).
//!
//! All instrument access goes through the `cryo_traits` capability traits and
//! is owned by exactly one [`agent::HardwareAgent`]. Everything else talks to
//! hardware through [`protocol::HardwareCommands`], either in-process or over
//! the line protocol served by [`server`] and spoken by [`client`].
//!
//! ## Architecture
//!
//! - **Agent**: sole owner of instruments, one mutex around all of them (`agent`)
//! - **Protocol**: request line codec and the command trait (`protocol`)
//! - **Server / Client**: TCP transport with bounded retry (`server`, `client`)
//! - **Orchestrator**: the two-side cooldown state machine (`orchestrator`)
//! - **Sampler**: fixed-cadence telemetry into chunked buffers (`sampler`, `telemetry`, `sink`)
//! - **Cancellation**: stop tokens and interruptible waits (`cancel`)

pub mod agent;
pub mod cancel;
pub mod client;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod orchestrator;
pub mod protocol;
pub mod sampler;
pub mod server;
pub mod sink;
pub mod state;
pub mod status;
pub mod telemetry;
pub mod util;

pub use agent::HardwareAgent;
pub use cancel::{CancelToken, Wait};
pub use client::AgentClient;
pub use config::{AgentSettings, CycleConfig, RetryPolicy, SamplerSettings, Side, SideConfig};
pub use error::{CommandError, CycleError, DeliveryError, SinkError};
pub use orchestrator::{CycleRunner, Orchestrator};
pub use protocol::{ChannelCommand, DeviceCatalog, HardwareCommands, Opcode};
pub use sampler::Sampler;
pub use server::{AgentServer, ServerHandle};
pub use state::{LastKnown, SwitchState};
pub use status::CycleStatus;

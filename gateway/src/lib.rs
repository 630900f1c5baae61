//! silta-gateway - Distributed device-control gateway
//!
//! Federates heterogeneous device plugins behind a single request surface.
//! Plugins announce themselves over the message bus; the gateway routes
//! JSON-RPC to them, proxies entities through gateway-owned virtual
//! mirrors, tracks the lifecycle of virtual commands, and journals every
//! observed state-change event.
//!
//! ```text
//!            registration / probes          entity events
//! plugins ─────────► registry                    │
//!    ▲                   │                       ▼
//!    │ JSON-RPC          ▼                event subscriber ──► journal
//!    └────────────── rpc router ◄── virtual store ◄── command monitors
//! ```
//!
//! The HTTP surface is an external collaborator: it calls the operations
//! on [`GatewayContext`] and maps [`GatewayError`] onto status codes via
//! [`GatewayError::status_code`].

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

mod batch;
mod commands;
mod config;
mod context;
mod descriptor;
mod discovery;
mod entities;
mod error;
mod events;
mod ids;
mod registry;
mod router;
mod search;
mod store;

pub use batch::{BatchResult, DeviceItem, DeviceRef, EntityItem, EntityRef};
pub use commands::{MONITOR_MAX_POLLS, MONITOR_POLL_INTERVAL};
pub use config::Config;
pub use context::GatewayContext;
pub use descriptor::RuntimeDescriptor;
pub use discovery::PROBE_INTERVAL;
pub use entities::CreateVirtualEntity;
pub use error::{GatewayError, Result};
pub use events::classify_event_name;
pub use ids::IdGenerator;
pub use registry::PluginRegistry;
pub use router::{RpcRouter, RPC_TIMEOUT};
pub use search::{SEARCH_MSG_WAIT, SEARCH_WINDOW};
pub use store::{
    entity_key, ObservedEvent, VirtualCommandRecord, VirtualEntityRecord, VirtualStore,
};

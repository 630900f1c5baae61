//! silta-core - Shared types for the Silta device gateway
//!
//! This crate provides the foundational types shared between the Silta
//! gateway and the device plugins it federates:
//!
//! - Wire types: [`Manifest`], [`Registration`], [`Device`], [`Entity`],
//!   [`CommandStatus`], [`EntityEventEnvelope`], [`SearchQuery`]
//! - The JSON-RPC 2.0 envelope carried on plugin RPC subjects ([`rpc`])
//! - Well-known bus subjects and RPC method names ([`subjects`], [`methods`])
//! - The [`Bus`] trait - the transport seam between the gateway and the
//!   message bus, with an in-process [`MemoryBus`] for tests and
//!   single-process deployments
//!
//! # Why this crate exists
//!
//! Device plugins need the wire types and the bus seam to talk to the
//! gateway. Without `silta-core` they would depend on `silta-gateway`
//! directly, dragging in the virtual store and command machinery, and any
//! gateway-side test plugin would create a cyclic dependency. Extracting
//! the shared surface here breaks the cycle:
//!
//! ```text
//! silta-core ◄── silta-gateway
//!     ▲
//!     └────────── device plugins (silta-test-light, ...)
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod command;
mod entity;
mod error;
mod event;
mod manifest;
mod search;

/// The message-bus transport seam
pub mod bus;
/// RPC method names understood by plugins and the gateway
pub mod methods;
/// JSON-RPC 2.0 envelope types
pub mod rpc;
/// Well-known bus subjects
pub mod subjects;

pub use bus::{Bus, BusMessage, MemoryBus, Subscription};
pub use command::{CommandState, CommandStatus};
pub use entity::{Device, Entity, EntityData, SyncStatus};
pub use error::BusError;
pub use event::EntityEventEnvelope;
pub use manifest::{Manifest, Registration};
pub use rpc::{Request, Response, RpcError};
pub use search::SearchQuery;

//! Meshwork Protocols
//!
//! The boundary between meshwork nodes and whatever transport carries
//! their bytes.
//!
//! # Overview
//!
//! - [`Envelope`] addresses a [`Payload`] and places it in a [`Lane`].
//! - [`ProtocolBridge`] turns envelopes into length-prefixed frames and
//!   back, losslessly.
//! - [`Sequencer`] and [`OrderedInbox`] restore per-`(task, view)` order
//!   over a transport that only promises at-least-once delivery.
//!
//! The bridge carries no business logic; mapping frames onto HTTP, gRPC or
//! WebSocket belongs to the surrounding system.
//!
//! # Example
//!
//! ```rust
//! use meshwork_protocols::{Envelope, Payload, ProtocolBridge};
//! use meshwork_topology::NodeId;
//!
//! let bridge = ProtocolBridge::new();
//! let env = Envelope::new(NodeId(1), NodeId(2), Payload::Heartbeat);
//! let bytes = bridge.encode(&env)?;
//! assert_eq!(bridge.decode(&bytes)?, env);
//! # Ok::<(), meshwork_protocols::Error>(())
//! ```

pub mod bridge;
pub mod envelope;
pub mod error;
pub mod inbox;

pub use bridge::{ProtocolBridge, DEFAULT_MAX_FRAME, HEADER_LEN, PROTOCOL_VERSION};
pub use envelope::{Envelope, Lane, Payload};
pub use error::{Error, Result};
pub use inbox::{OrderedInbox, Sequencer, DEFAULT_MAX_PENDING};

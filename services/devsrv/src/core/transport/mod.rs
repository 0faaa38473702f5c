//! Transport Layer Module
//!
//! Byte-level I/O separated from device protocol logic. Relay boards are
//! driven over serial ports, projectors over short-lived TCP connections.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   RelayCommander / ProjectorControl          │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │   Transport trait                            │
//! │   connect(), send(), receive(), clear_input()│
//! └──────────────────────────────────────────────┘
//!          │                  │              │
//!          ▼                  ▼              ▼
//!     ┌─────────┐      ┌───────────┐   ┌─────────┐
//!     │ Serial  │      │    TCP    │   │  Mock   │
//!     └─────────┘      └───────────┘   └─────────┘
//! ```

pub mod factory;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;

pub use factory::{PortConnector, SerialPortConnector};
pub use serial::{SerialTransport, SerialTransportConfig};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use traits::{ConnectionState, Transport, TransportError, TransportStats};

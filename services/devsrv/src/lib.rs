//! Device gateway library
//!
//! Drives serial relay boards (lockers) and network projectors on behalf of
//! an HTTP front end. Every operation is reachable through [`Gateway`];
//! hardware outcomes come back as structured results, and `Err` is reserved
//! for requests rejected before any I/O.
//!
//! ```text
//! Gateway ──► ChannelMapper ──► RelayCommander ──► PortRegistry ──► serial port
//!    │                                 │
//!    ├──► LockerStateCache ◄── RelockScheduler
//!    └──► ProjectorControlFactory ──► ProjectorControl ──► TCP
//! ```

pub mod core;
pub mod error;

pub use crate::core::config::GatewayConfig;
pub use crate::core::gateway::{Gateway, GatewayHealth, LockerCommandResult};
pub use crate::core::projector::{ProjectorCommandResult, ProjectorProtocolType, ProjectorStatus};
pub use crate::core::relay::SerialCommandResult;
pub use crate::error::{ErrorKind, GatewayError, GatewayResult};

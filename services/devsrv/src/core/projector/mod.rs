//! Network projector control
//!
//! - `protocol`: the three wire variants as descriptor tables
//! - `control`: per-command TCP exchange and result classification
//! - `factory`: address validation and protocol selection

pub mod control;
pub mod factory;
pub mod protocol;

pub use control::{ProjectorCommandResult, ProjectorControl};
pub use factory::ProjectorControlFactory;
pub use protocol::{ProjectorProtocol, ProjectorProtocolType, ProjectorStatus};

//! Core gateway components
//!
//! - **`transport`** - serial and TCP byte transports behind one trait
//! - **`port_registry`** - one cached handle and one gate per serial port
//! - **`relay`** - gated command/response exchange with relay boards
//! - **`mapper`** / **`commands`** - locker numbers and command bytes
//! - **`state_cache`** / **`relock`** - soft latch and delayed relock
//! - **`board_status`** - channel bitfield readback
//! - **`projector`** - LG RS232, PJLink and PJ Talk over TCP
//! - **`gateway`** - the facade the HTTP layer calls

pub mod board_status;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod mapper;
pub mod port_registry;
pub mod projector;
pub mod relay;
pub mod relock;
pub mod state_cache;
pub mod transport;

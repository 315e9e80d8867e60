//! Client-side runtime for a fleet of networked laser-profile scan heads.
//!
//! A [`session::ScanSystem`] owns one [`head::ScanHead`] per registered unit,
//! a shared outbound [`sender::CommandBus`], and drives the
//! `{Disconnected, Connected, Scanning}` lifecycle. The [`ffi`] module
//! re-exposes the same operations as a `cdylib` C ABI for non-Rust hosts.

pub mod alignment;
pub mod assembler;
pub mod config;
pub mod error;
pub mod ffi;
pub mod head;
pub mod profile;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod temperature;
pub mod window;
pub mod wire;

pub use error::{ErrorCode, ScanError};
pub use session::{ScanSystem, SystemState};

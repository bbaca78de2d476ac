//! cosim Wire Protocol - Binary envelope format
//!
//! This crate implements the format every participant speaks:
//! - Fixed preamble (version + message kind)
//! - Length-prefixed sender identity
//! - Length-prefixed body, one layout per message kind

pub mod envelope;
pub mod kind;
pub mod payload;

pub use envelope::*;
pub use kind::*;
pub use payload::*;

//! # phx-core
//!
//! Foundation types for the Phoenix Channels client.
//!
//! This crate provides the shared vocabulary the other `phx-*` crates depend on:
//!
//! - **Envelope**: [`Message`] with its opportunistically decoded reply metadata
//! - **Refs**: [`RefGenerator`], a lock-free wrapping correlation-id source
//! - **Constants**: reserved topic/event names, default intervals, close codes
//! - **Errors**: [`PhxError`] hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod logging;
pub mod message;
pub mod refs;

pub use errors::{DecodeError, ErrorKind, PhxError, Result};
pub use message::{Message, ReplyStatus};
pub use refs::RefGenerator;

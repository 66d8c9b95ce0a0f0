//! # SIFT Common Library
//!
//! Shared code for all SIFT pipeline stages including:
//! - Notification payloads (`Location`, `LabeledImage`)
//! - Broker, object store and annotation ports with their backends
//! - The subscription receive loop and ack policy
//! - Configuration loading, tracing setup, health routes

pub mod annotate;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod health;
pub mod server;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use message::{LabeledImage, Location, MalformedMessage};

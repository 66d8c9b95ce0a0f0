//! HTTP API handlers

mod upload;

pub use upload::receive_upload;

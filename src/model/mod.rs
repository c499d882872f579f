//! Core data model: messages, thread groups, and sender addresses.

pub mod address;
pub mod message;
pub mod thread;

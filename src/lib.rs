//! `gmail-archiver`: archive Gmail threads as compressed tar files.
//!
//! This crate provides the core library: thread-grouped messages are written
//! as a tar stream (one directory per thread, one `.eml` per message) and
//! encoded with LZMA, gzip, bzip2 or XZ under a bounded memory budget.

pub mod archive;
pub mod config;
pub mod error;
pub mod model;
pub mod naming;
pub mod securefs;
pub mod source;

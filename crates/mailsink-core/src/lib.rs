//! # mailsink-core
//!
//! Everything around the SMTP capture server that is not protocol work.
//!
//! This crate provides:
//! - **Configuration** - JSON file with defaults, validation, conversion to
//!   server settings
//! - **Storage** - the [`MailStorage`] interface with in-memory and `SQLite`
//!   backends, search and purge
//! - **Storage consumer** - the task draining the mail item channel into
//!   storage

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod consumer;
mod error;
pub mod storage;

pub use config::{Configuration, DEFAULT_CONFIG_FILE, StorageEngine, ValidationError};
pub use consumer::{ConsumerStats, spawn_storage_consumer};
pub use error::{Error, Result};
pub use storage::{MailStorage, MemoryStorage, Page, SearchCriteria, SqliteStorage, open_storage};

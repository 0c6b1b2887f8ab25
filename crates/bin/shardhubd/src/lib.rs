//! # shardhubd: shardhub daemon
//!
//! Composition root that wires the runtime to its adapters.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Build the hub, its space and shards, seeding canonical shards
//! - Attach device behaviors backed by the virtual pin bank
//! - Start peer links over TCP and accept inbound peers
//! - Run the start-up script
//! - Handle graceful shutdown (Ctrl-C)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

pub mod config;
pub mod daemon;
pub mod script;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! meshrpc registry server.
//!
//! Providers publish `(service key, address)` entries over a session; the
//! server keeps them alive by lease, answers resolves and pushes the full
//! address set of a key to its watchers whenever it changes.

pub mod config;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use server::{RegistryServer, ServerError, WatchRouter, WatchStats};

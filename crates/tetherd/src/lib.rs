//! tether daemon - relay connection pool
//!
//! This crate provides the runtime of the tether daemon:
//! - `worker` - Per-relay connection worker (connect, handshake, heartbeat, backoff)
//! - `supervisor` - Registry actor reconciling running workers against membership
//! - `source` - Where the desired relay membership is read from
//! - `notifier` - File watcher and debouncer that trigger reloads
//! - `config` - Daemon configuration and startup checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       tetherd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  FileWatcher    │────▶│       Debouncer             │   │
//! │  │ (notify thread) │     │  (coalesces bursts)         │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ reload            │
//! │                                         ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ MembershipSource│◀────│     SupervisorActor         │   │
//! │  │  (relay list)   │     │  (worker registry owner)    │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ spawn / stop      │
//! │                                         ▼                   │
//! │                          ┌─────────────────────────────┐   │
//! │                          │  ConnectionWorker (per relay)│   │
//! │                          │  SOCKS5 ─▶ TLS ─▶ websocket  │   │
//! │                          └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod notifier;
pub mod source;
pub mod supervisor;
pub mod worker;

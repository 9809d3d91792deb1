//! Purpose: Shared library crate behind the `bookstack` read, write, and web processes.
//! Exports: `api` (book model, record store gateway, services, upstream client, store backends).
//! Role: Keeps storage and composition logic out of the HTTP binaries so tests can drive it directly.
//! Invariants: Storage modules stay private; `api` is the only public path to them.
pub mod api;
mod core;

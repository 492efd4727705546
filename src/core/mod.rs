// src/core/mod.rs

//! The scan engine: events, targets, modules, the store, and the scan
//! orchestrator. Nothing in here knows about the terminal UI.

pub mod cache;
pub mod catalogue;
pub mod error;
pub mod event;
pub mod fetch;
pub mod graph;
pub mod module;
pub mod modules;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod target;

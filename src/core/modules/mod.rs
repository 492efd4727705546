// src/core/modules/mod.rs

//! Modules shipped with the engine.

pub mod bitcoinabuse;
pub mod blocklist;
pub mod dns;
pub mod sslcert;
pub mod storage;
pub mod webcontent;

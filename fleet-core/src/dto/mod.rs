//! Data Transfer Objects
//!
//! Wire types exchanged between the manager, the in-container agent and
//! API consumers.

pub mod agent;
pub mod runner;

//! Core domain types
//!
//! Shared between the manager (which derives and reconciles status) and the
//! in-container agent (which reports it).

pub mod probe;
pub mod registration;
pub mod runner;

//! Fleet Core
//!
//! Core types and shared lifecycle primitives for the runner fleet.
//!
//! This crate contains:
//! - Domain types: runner identity, status, probe errors, registration results
//! - DTOs: the control agent wire protocol and the manager's runner views
//! - Install directory markers: how on-disk state maps to a status
//! - Process control: liveness checks and detached start/stop of a runner

pub mod domain;
pub mod dto;
pub mod install;
pub mod process;

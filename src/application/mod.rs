//! Application layer: the billing components and their orchestration.
//!
//! Components receive the configuration and their ports explicitly;
//! [`engine::BillingEngine`] wires them together once at startup.

pub mod commands;
pub mod engine;
pub mod generator;
pub mod lock_manager;
pub mod processor;
pub mod registry;
pub mod renderer;
pub mod scheduler;
pub mod worker;

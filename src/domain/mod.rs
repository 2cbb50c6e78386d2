//! Billing entities, their transition tables, and the ports the engine
//! talks to. Nothing in here performs I/O.

pub mod document;
pub mod job;
pub mod lock;
pub mod money;
pub mod ports;
pub mod subscription;
pub mod transaction;

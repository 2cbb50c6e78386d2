//! Outer adapters that move data in and out of the engine.

pub mod csv;

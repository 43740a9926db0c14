//! Core scheduling types: time, slots, triggers, strategies and workflows.

pub mod schedule;
pub mod slot;
pub mod store;
pub mod strategy;
pub mod time;
pub mod trigger;
pub mod types;
pub mod workflow;

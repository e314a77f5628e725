//! API endpoint handlers

pub mod executions;
pub mod health;
pub mod registry;
pub mod workflows;

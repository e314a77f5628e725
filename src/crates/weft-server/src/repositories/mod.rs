//! Persistence repositories over the shared database

pub mod run_repository;
pub mod workflow_repository;

pub use run_repository::RunRepository;
pub use workflow_repository::WorkflowRepository;

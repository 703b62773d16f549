//! Row models and create DTOs.

pub mod job;
pub mod segment;
pub mod status;
pub mod workspace;

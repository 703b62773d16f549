pub mod context;
pub mod error;
pub mod failure;
pub mod generation;
pub mod hashing;
pub mod output;
pub mod scene;
pub mod types;
pub mod workspace;

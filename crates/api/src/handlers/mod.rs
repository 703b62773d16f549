pub mod jobs;
pub mod workspaces;

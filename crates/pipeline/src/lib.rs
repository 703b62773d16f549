//! Generation and rendering stages of a job.
//!
//! - [`generator`]: builds the prompt from workspace history, calls the
//!   language model and extracts a normalized code increment.
//! - [`renderer`]: the [`SceneRenderer`](renderer::SceneRenderer) boundary
//!   and its failure taxonomy.
//! - [`manim`]: the production renderer, running manim in the [`sandbox`].
//! - [`probe`]: `ffprobe` duration lookup for rendered segments.

pub mod generator;
pub mod manim;
pub mod probe;
pub mod prompt;
pub mod renderer;
pub mod sandbox;

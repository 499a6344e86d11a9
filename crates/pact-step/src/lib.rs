//! Pact Step
//!
//! A step is the unit of work a promise tracks: given JSON arguments it
//! eventually produces a JSON result or fails. The orchestrator depends only
//! on that capability, never on what a step does internally.
//!
//! Steps may be written as a type implementing [`Step`], as an async closure
//! wrapped with [`step_fn`], or as a pipeline of dependent stages built with
//! [`Chain`]. Named steps are collected in a [`StepRegistry`].

mod registry;
mod step;

pub use registry::StepRegistry;
pub use step::{Chain, FnStep, Step, step_fn};

//! `wgpu` side of the pipeline.
//!
//! - `context` owns the instance, device and (optionally) the window surface.
//! - `program` turns a validated program layout into shader modules, a
//!   uniform buffer and per-format render pipelines.
//! - `texture` holds the single live source texture.
//! - `targets` manages the pair of offscreen layer targets.
//! - `readback` copies an export target back to the CPU.
//! - `backend` implements [`crate::orchestrator::RenderBackend`] on top of
//!   all of the above.

mod backend;
mod context;
mod program;
mod readback;
mod targets;
mod texture;

pub(crate) use backend::WgpuBackend;
pub(crate) use context::GpuContext;

//! Sandboxed multi-framework grading engine.
//!
//! A request flows screener → adapter → workspace → sandbox → report →
//! evaluator, driven by the dispatcher's `Engine`.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod report;
pub mod sandbox;
pub mod screener;
pub mod workspace;


pub use config::EngineConfig;
pub use dispatcher::{render, Engine, RenderedWorkspace};
pub use sandbox::{DockerSandbox, SandboxRunner};

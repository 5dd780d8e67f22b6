// src/lib.rs

//! Change-driven coverage probes for Go sources: diff two revisions, plan
//! where probes go, rewrite the files, and emit the generated track package.

pub mod cli;
pub mod component;
pub mod config;
pub mod diff;
pub mod entry;
pub mod error;
pub mod generated;
pub mod instrument;
pub mod model;
pub mod planner;
pub mod pool;
pub mod rewrite;
pub mod scope;
pub mod syntax;

pub use error::{Error, Result};
pub use instrument::{run, Instrumenter, Report, RunOptions};

//! CLI command implementations.

pub mod common;
pub mod detect;
pub mod run;
pub mod submit;
pub mod wait;

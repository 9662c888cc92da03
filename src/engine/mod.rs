// src/engine/mod.rs

//! Attempt lifecycle and scoring.

pub mod attempts;
pub mod scoring;

pub use attempts::AttemptEngine;

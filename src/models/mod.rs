// src/models/mod.rs

pub mod activity;
pub mod ai_content;
pub mod attempt;
pub mod question;
pub mod quiz;
pub mod result;
pub mod stats;
pub mod user;

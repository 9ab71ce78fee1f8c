//! Core types shared by every stage of a task run.

pub mod environment;
pub mod error;
pub mod params;
pub mod types;

//! Application services: file admission and the preview rendering pipeline.

pub mod error;
pub mod render;
pub mod validation;

//! Small shared helpers.

pub mod bytes;
pub mod html;

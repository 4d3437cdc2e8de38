//! Domain types and invariants for document admission.

pub mod documents;
pub mod error;
pub mod slug;

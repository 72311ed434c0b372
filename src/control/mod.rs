//! Control documents, the structured input the engine is configured from.
//!
//! - `document` holds the base control document: workflows, proposals, finish stages, features
//! - `addon` holds add-on documents and the patches they carry

pub mod addon;
pub mod document;

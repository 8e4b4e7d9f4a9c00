//! Higher-level Kiro API surfaces: model listing and the raw escape hatch.

pub mod messages;
pub mod models;
pub mod raw;

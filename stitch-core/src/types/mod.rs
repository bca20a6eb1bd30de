//! Core type definitions.

mod ids;

pub use ids::{Id64, Id128, RandId};

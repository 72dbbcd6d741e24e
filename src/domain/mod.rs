//! Domain types for pod execution

pub mod entities;

pub use entities::*;

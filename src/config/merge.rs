//! Config composition: default layer and source ordering.

pub mod policy;
pub mod service;

//! Feature slices

pub mod taint_analysis;

//! Shared across features

pub mod models;

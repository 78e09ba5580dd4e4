//! Storage modules: config, metadata cache

pub mod cache;
pub mod config;

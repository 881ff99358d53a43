//! Side-effecting adapters: configuration files, settings and module sources.

pub mod config;
pub mod environment;
pub mod resource_tree;
pub mod settings;
pub mod source;

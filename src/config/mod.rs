// src/config/mod.rs - Configuration module
// Tree location: ./src/config/mod.rs

//! Configuration for the meantrim CLI

pub mod settings;

pub use settings::Settings;

// src/lib.rs
pub mod error;
pub mod config;

pub mod data {
    pub mod shard;
    pub mod catalog;
    pub mod resolver;
    pub mod assembler;
    pub mod loader;
    pub mod generator;
    pub mod scaler_io;
}

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod function;
pub mod logger;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod stack;
pub mod upload;

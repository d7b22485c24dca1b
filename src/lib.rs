pub mod cli;
pub mod common;
pub mod config;
pub mod database;
pub mod models;
pub mod operations;
pub mod utils;
pub mod workflow;

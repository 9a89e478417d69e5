pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod money;
pub mod services;

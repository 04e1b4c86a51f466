pub mod config;
pub mod motor;

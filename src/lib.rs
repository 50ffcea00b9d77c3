pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod ws;

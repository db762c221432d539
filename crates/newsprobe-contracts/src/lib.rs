pub mod classify;
pub mod config;
pub mod models;
pub mod prompt;
pub mod runs;
pub mod store;

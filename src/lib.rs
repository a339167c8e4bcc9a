pub mod archive;
pub mod auth;
pub mod cli;
pub mod coordinator;
pub mod daemon;
pub mod errors;
pub mod models;
pub mod resolver;
pub mod server;
pub mod storage;

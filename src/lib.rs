pub mod cache;
pub mod common;
pub mod configs;
pub mod server;
pub mod transport;

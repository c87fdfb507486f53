pub mod config;
pub mod error;
pub mod grades;
pub mod monitor;
pub mod notify;
pub mod output;
pub mod server;
pub mod session;
pub mod snapshot;

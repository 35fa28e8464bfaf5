//! netwatchd
//!
//! A server that watches one file and streams a JSON line to every connected
//! TCP subscriber each time the file changes.

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod state;
pub mod watcher;

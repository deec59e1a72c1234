pub mod cluster;
pub mod cmd;
pub mod command;
pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod handlers;
pub mod kube;
pub mod logging;
pub mod resource;
pub mod signal;
pub mod worker;

pub mod config;
pub mod protocol;
pub mod tcp_server;
pub mod ws_server;

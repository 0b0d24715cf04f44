pub mod config;
pub mod finch;
pub mod messages;
pub mod runtime;
pub mod sim;

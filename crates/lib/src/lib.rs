//! taskgate core library: script registry, instruction translator, command sanitizer,
//! execution supervisor, path jail and the HTTP gateway, shared by the CLI.

pub mod config;
pub mod dispatch;
pub mod exec;
pub mod gateway;
pub mod init;
pub mod jail;
pub mod llm;
pub mod registry;
pub mod sanitize;

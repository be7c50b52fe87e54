// ABOUTME: Local edge function server for fnserve
// ABOUTME: Resolves per-function configuration, assembles sandbox environments and drives a serve run

pub mod command;
pub mod env;
pub mod error;
pub mod resolver;
pub mod serve;
pub mod slug;

pub use env::{parse_env_file, UserEnv};
pub use error::{Result, ServeError};
pub use resolver::{ResolvedConfig, ServeRequest};
pub use serve::FunctionServer;
pub use slug::validate_function_slug;

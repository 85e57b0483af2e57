//! Crate-local types shared by the engines, the manager and the channel.

pub mod errors;

pub use errors::McpManagementError;

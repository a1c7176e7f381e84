//! Model Context Protocol surface: tool manifests, the sandboxed script
//! environment, the TOON encoding, and the server binding that ties them
//! together (§4.F-H, §6).

pub mod manifest;
pub mod script_env;
pub mod server;
pub mod tool_provider;
pub mod toon;

pub use script_env::{ToolHost, ToolSummary};
pub use server::{McpServer, ToolListing};
pub use tool_provider::ToolProvider;

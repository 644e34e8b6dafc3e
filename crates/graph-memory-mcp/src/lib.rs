//! Graph Memory MCP Server
//!
//! A Model Context Protocol (MCP) server exposing a repository-scoped
//! knowledge graph ("memory bank"). Clients invoke a fixed tool catalog
//! that reads and mutates a per-repository, per-branch embedded graph
//! database, receiving streamed progress notifications ahead of each
//! final JSON-RPC response.
//!
//! # Features
//!
//! - **Two transports**: line-delimited JSON-RPC over stdio, and a
//!   multi-client HTTP endpoint with SSE streaming
//! - **17 MCP tools**: entity CRUD, context journaling, search, bulk
//!   import, and graph algorithms (PageRank, k-core, Louvain, components,
//!   shortest path)
//! - **Session-ful**: opaque session ids, idle sweep, cooperative
//!   cancellation down to each request
//! - **Embedded storage**: one graph file per `(clientProjectRoot,
//!   branch)`, provisioned on first use
//!
//! # Example
//!
//! ```no_run
//! use graph_memory_mcp::{config::Config, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     McpServer::new(config).run_stdio().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod server;
pub mod tools;

pub use config::Config;
pub use error::{StoreError, ToolError};
pub use server::McpServer;

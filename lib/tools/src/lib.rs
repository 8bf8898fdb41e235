//! Tool catalogue for the sales-ops assistant.
//!
//! This crate provides:
//!
//! - **Catalogue**: the closed set of tools ([`ToolName`]) with their
//!   descriptions and JSON input schemas
//! - **Typed calls**: [`ToolCall`] pairs each tool with its parsed input
//! - **Executor**: [`ToolExecutor`] runs calls against the CRM and telephony
//!   connectors and never fails; errors come back as `{"error": "..."}`
//!
//! The orchestrator depends only on the [`ToolRunner`] trait.

pub mod call;
pub mod catalogue;
pub mod error;
pub mod executor;
mod handlers;
pub mod input;
mod query;
mod records;

pub use call::ToolCall;
pub use catalogue::{ToolDefinition, ToolName, catalogue};
pub use error::{ToolError, error_payload, is_error_payload};
pub use executor::{ToolExecutor, ToolRunner, ToolSettings};

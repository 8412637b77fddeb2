//! Tool-execution boundary for the desktop agent.
//!
//! Provides:
//! - `ToolRegistry` - dispatch tool calls by name
//! - `GuardedExecutor` - scope and deny-list enforcement before any filesystem access
//!
//! Concrete file tools plug in as `ToolHandler`s.

pub mod deny_list;
pub mod guard;
pub mod registry;
pub mod unicode;

pub use deny_list::is_denied;
pub use guard::{GuardedExecutor, authorize_path};
pub use registry::{ToolHandler, ToolRegistry};

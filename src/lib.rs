//! Toolhub - tool-dispatch server
//!
//! A registry of named operations invoked by name with structured arguments,
//! a path router that maps HTTP requests to handler scripts, and a semantic
//! index that ranks operations against a natural-language query.

pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod index;
pub mod inference;
pub mod persistence;
pub mod process;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;

// Re-export key types for convenience
pub use config::Config;
pub use dispatch::{Dispatcher, Envelope, InvocationRequest};
pub use error::{AppError, ErrorKind, Result};
pub use index::{SearchHit, SemanticIndex};
pub use inference::{Embedder, HashingEmbedder};
pub use registry::{Capability, CapabilityRegistry, OperationDescriptor};
pub use router::{PathRouter, RouteServerManager};
pub use state::AppState;
pub use store::KeyedStore;

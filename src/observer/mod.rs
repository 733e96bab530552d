// Transaction observer: change capture during a transaction and callback
// dispatch once it resolves

pub mod entity;
pub mod operation;
pub mod snapshot;
pub mod change_log;
pub mod context;
pub mod traits;
pub mod registry;
pub mod pipeline;
pub mod thread_scope;
pub mod error;

// Re-export core types
pub use entity::*;
pub use operation::*;
pub use snapshot::*;
pub use change_log::*;
pub use context::*;
pub use traits::*;
pub use registry::*;
pub use pipeline::*;
pub use thread_scope::*;
pub use error::*;

//! The Model Index (D), Router Core (E), and Health Reconciler (F).

pub mod health;
pub mod model_index;
pub mod router;

pub use model_index::ModelIndex;
pub use router::RouterCore;

//! Typed client for the ScoutDesk API with an optimistic query cache for
//! trial and calendar writes.

pub mod api;
pub mod cache;
pub mod error;
pub mod mutations;
pub mod types;

pub use api::{ApiClient, TrialApi};
pub use cache::{QueryCache, Snapshot};
pub use error::{ClientError, ClientResult};
pub use mutations::TrialMutations;

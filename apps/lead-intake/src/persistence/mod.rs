pub mod fallback;
pub mod router;
pub mod store;

pub use fallback::JsonlFallbackStore;
pub use router::{PersistenceError, PersistenceRouter};
pub use store::{LeadStore, LeadStoreError};

#[cfg(test)]
mod tests;

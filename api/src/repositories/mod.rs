pub mod account_repository;
pub mod in_memory;

pub use account_repository::{AccountStore, PostgresAccountStore, StoreError, StoreResult};
pub use in_memory::InMemoryAccountStore;

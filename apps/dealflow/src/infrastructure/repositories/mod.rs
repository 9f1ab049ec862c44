// Repository implementations (data access layer)
// Adapters that implement domain repository interfaces

pub mod in_memory_checkpoint_store;
pub mod postgres_checkpoint_store;

pub use in_memory_checkpoint_store::InMemoryCheckpointStore;
pub use postgres_checkpoint_store::PostgresCheckpointStore;

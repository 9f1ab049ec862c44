// Repository contracts (ports) implemented by the infrastructure layer

pub mod checkpoint_repository;

pub use checkpoint_repository::CheckpointStore;

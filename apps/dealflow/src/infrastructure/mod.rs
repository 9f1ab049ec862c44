// Infrastructure layer module
// Checkpoint stores and reference domain service adapters
// Follows Hexagonal Architecture

pub mod repositories;
pub mod services;

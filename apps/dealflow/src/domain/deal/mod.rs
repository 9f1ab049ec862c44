// Deal domain module
// Contains the deal aggregate, its status lattice, scoring and transition events

#![allow(clippy::module_inception)]

pub mod deal;
pub mod events;
pub mod scoring;
pub mod value_objects;

// Re-export main types for convenience
pub use deal::{Analysis, ContractFile, Deal, DraftedDocument, Outreach};
pub use events::DealTransition;
pub use scoring::{DealScore, ScoreComponents, ScoringWeights};
pub use value_objects::{DealId, DealStatus, Listing, Recommendation};

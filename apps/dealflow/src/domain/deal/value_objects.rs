use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic deal ids (UUID v5 over source + external id)
const DEAL_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a57_93d4_4b0e_9e3a_5d0c_81f2_a7b4);

/// Identifier of a deal, unique within a run
///
/// Derived from the listing it was discovered from, so re-running discovery
/// over the same listings yields the same ids instead of duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(Uuid);

impl DealId {
    pub fn from_listing(source: &str, external_id: &str) -> Self {
        let name = format!("{}:{}", source, external_id);
        Self(Uuid::new_v5(&DEAL_NAMESPACE, name.as_bytes()))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a deal
///
/// # Status Lattice
/// ```text
/// Discovered -> Analyzed -> Approved -> Negotiating -> UnderContract -> Closed
///                     └---> Rejected
/// ```
/// Transitions are monotonic: one edge at a time, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Discovered,
    Analyzed,
    Approved,
    Rejected,
    Negotiating,
    UnderContract,
    Closed,
}

impl DealStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Discovered -> Analyzed
    /// - Analyzed -> Approved
    /// - Analyzed -> Rejected
    /// - Approved -> Negotiating
    /// - Negotiating -> UnderContract
    /// - UnderContract -> Closed
    pub fn can_transition_to(&self, next: DealStatus) -> bool {
        use DealStatus::*;
        matches!(
            (self, next),
            (Discovered, Analyzed)
                | (Analyzed, Approved)
                | (Analyzed, Rejected)
                | (Approved, Negotiating)
                | (Negotiating, UnderContract)
                | (UnderContract, Closed)
        )
    }

    /// Position in the lattice; Approved and Rejected share a rank
    pub fn rank(&self) -> u8 {
        match self {
            DealStatus::Discovered => 0,
            DealStatus::Analyzed => 1,
            DealStatus::Approved | DealStatus::Rejected => 2,
            DealStatus::Negotiating => 3,
            DealStatus::UnderContract => 4,
            DealStatus::Closed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Rejected | DealStatus::Closed)
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DealStatus::Discovered => write!(f, "discovered"),
            DealStatus::Analyzed => write!(f, "analyzed"),
            DealStatus::Approved => write!(f, "approved"),
            DealStatus::Rejected => write!(f, "rejected"),
            DealStatus::Negotiating => write!(f, "negotiating"),
            DealStatus::UnderContract => write!(f, "under_contract"),
            DealStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Analyst verdict on a scored deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Proceed,
    Review,
    Pass,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Proceed => write!(f, "proceed"),
            Recommendation::Review => write!(f, "review"),
            Recommendation::Pass => write!(f, "pass"),
        }
    }
}

/// A property listing as returned by a listing source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub source: String,
    pub external_id: String,
    pub address: String,
    pub market: String,
    pub listing_price: Decimal,
    /// Seller-independent value estimate, if the source provides one
    pub estimated_value: Option<Decimal>,
    pub days_on_market: u32,
}

impl Listing {
    pub fn deal_id(&self) -> DealId {
        DealId::from_listing(&self.source, &self.external_id)
    }
}

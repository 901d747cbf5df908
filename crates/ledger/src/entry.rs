use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, CorrelationId, DomainError, DomainResult, Entity, ItemId, LedgerEntryId, LocationId,
    LotId, OrganizationId,
};

use crate::BalanceKey;

/// Why stock moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Variance booked when a count sheet is finalized.
    CountAdjustment,
    /// Consumption (always negative).
    Usage,
    /// Goods received (always positive).
    Receipt,
    /// Operator correction; requires a memo.
    ManualAdjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::CountAdjustment => "count_adjustment",
            MovementType::Usage => "usage",
            MovementType::Receipt => "receipt",
            MovementType::ManualAdjustment => "manual_adjustment",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count_adjustment" => Ok(MovementType::CountAdjustment),
            "usage" => Ok(MovementType::Usage),
            "receipt" => Ok(MovementType::Receipt),
            "manual_adjustment" => Ok(MovementType::ManualAdjustment),
            other => Err(DomainError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

/// A movement submitted for posting.
///
/// `organization_id` is whatever the caller claimed; the scoped gateway replaces
/// it with the resolved organization before anything is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub organization_id: Option<OrganizationId>,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    /// Signed quantity in the item's canonical unit.
    pub quantity: f64,
    pub movement_type: MovementType,
    pub correlation_id: CorrelationId,
    pub actor_id: ActorId,
    pub memo: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(
        item_id: ItemId,
        location_id: LocationId,
        quantity: f64,
        movement_type: MovementType,
        correlation_id: CorrelationId,
        actor_id: ActorId,
    ) -> Self {
        Self {
            organization_id: None,
            item_id,
            location_id,
            lot_id: None,
            quantity,
            movement_type,
            correlation_id,
            actor_id,
            memo: None,
        }
    }

    pub fn with_lot(mut self, lot_id: LotId) -> Self {
        self.lot_id = Some(lot_id);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Balance key this entry contributes to, under the given organization.
    pub fn key(&self, organization_id: OrganizationId) -> BalanceKey {
        BalanceKey {
            organization_id,
            item_id: self.item_id,
            location_id: self.location_id,
            lot_id: self.lot_id,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.quantity.is_finite() {
            return Err(DomainError::validation("quantity must be finite"));
        }

        match self.movement_type {
            MovementType::Receipt if self.quantity <= 0.0 => {
                return Err(DomainError::validation("receipt quantity must be positive"));
            }
            MovementType::Usage if self.quantity >= 0.0 => {
                return Err(DomainError::validation("usage quantity must be negative"));
            }
            MovementType::ManualAdjustment => {
                if self.quantity == 0.0 {
                    return Err(DomainError::validation("manual adjustment cannot be zero"));
                }
                if self.memo.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(DomainError::validation("manual adjustment requires a memo"));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// An immutable, committed ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    /// Store-assigned, strictly increasing insertion position.
    pub sequence: u64,
    pub organization_id: OrganizationId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub quantity: f64,
    pub movement_type: MovementType,
    pub correlation_id: CorrelationId,
    pub actor_id: ActorId,
    pub memo: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialize a validated submission. The caller supplies identity and ordering.
    pub fn commit(
        organization_id: OrganizationId,
        new: NewLedgerEntry,
        id: LedgerEntryId,
        sequence: u64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            organization_id,
            item_id: new.item_id,
            location_id: new.location_id,
            lot_id: new.lot_id,
            quantity: new.quantity,
            movement_type: new.movement_type,
            correlation_id: new.correlation_id,
            actor_id: new.actor_id,
            memo: new.memo,
            recorded_at,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey {
            organization_id: self.organization_id,
            item_id: self.item_id,
            location_id: self.location_id,
            lot_id: self.lot_id,
        }
    }
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(quantity: f64, movement: MovementType) -> NewLedgerEntry {
        NewLedgerEntry::new(
            ItemId::new(),
            LocationId::new(),
            quantity,
            movement,
            CorrelationId::new(),
            ActorId::new(),
        )
    }

    #[test]
    fn receipt_must_be_positive() {
        assert!(entry(12.0, MovementType::Receipt).validate().is_ok());
        assert!(entry(0.0, MovementType::Receipt).validate().is_err());
        assert!(entry(-1.0, MovementType::Receipt).validate().is_err());
    }

    #[test]
    fn usage_must_be_negative() {
        assert!(entry(-0.25, MovementType::Usage).validate().is_ok());
        assert!(entry(3.0, MovementType::Usage).validate().is_err());
    }

    #[test]
    fn count_adjustment_may_confirm_balance_with_zero() {
        assert!(entry(0.0, MovementType::CountAdjustment).validate().is_ok());
        assert!(entry(-4.0, MovementType::CountAdjustment).validate().is_ok());
    }

    #[test]
    fn manual_adjustment_needs_memo() {
        assert!(entry(2.0, MovementType::ManualAdjustment).validate().is_err());
        assert!(
            entry(2.0, MovementType::ManualAdjustment)
                .with_memo("   ")
                .validate()
                .is_err()
        );
        assert!(
            entry(2.0, MovementType::ManualAdjustment)
                .with_memo("spillage found in walk-in")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn non_finite_quantity_is_rejected() {
        assert!(entry(f64::NAN, MovementType::CountAdjustment).validate().is_err());
        assert!(entry(f64::INFINITY, MovementType::Receipt).validate().is_err());
    }

    #[test]
    fn movement_type_wire_names() {
        for m in [
            MovementType::CountAdjustment,
            MovementType::Usage,
            MovementType::Receipt,
            MovementType::ManualAdjustment,
        ] {
            assert_eq!(m.as_str().parse::<MovementType>().unwrap(), m);
            assert_eq!(serde_json::to_value(m).unwrap(), serde_json::json!(m.as_str()));
        }
    }
}

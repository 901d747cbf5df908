//! Organization-owned catalog records referenced by ledger entries.

use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, ItemId, LocationId, OrganizationId, OrganizationOwned,
};

/// Something that is counted, received and used (flour, lager keg, napkins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: ItemId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Unit all ledger quantities for this item are expressed in (`kg`, `l`, `ea`).
    pub canonical_unit: String,
    pub active: bool,
}

impl StockItem {
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        canonical_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: ItemId::new(),
            organization_id,
            name: name.into(),
            canonical_unit: canonical_unit.into(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemFilter {
    pub active: Option<bool>,
    /// Case-insensitive substring match on the name.
    pub name_contains: Option<String>,
}

impl Entity for StockItem {
    type Id = ItemId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl OrganizationOwned for StockItem {
    type Filter = StockItemFilter;

    const KIND: &'static str = "stock_item";

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn assign_organization(&mut self, organization_id: OrganizationId) {
        self.organization_id = organization_id;
    }

    fn assign_id(&mut self, id: Self::Id) {
        self.id = id;
    }

    fn matches(&self, filter: &Self::Filter) -> bool {
        filter.active.is_none_or(|a| a == self.active)
            && name_matches(&self.name, filter.name_contains.as_deref())
    }

    fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        if self.canonical_unit.trim().is_empty() {
            return Err(DomainError::validation("item canonical unit cannot be empty"));
        }
        Ok(())
    }
}

/// A place stock is kept (dry store, walk-in, bar).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLocation {
    pub id: LocationId,
    pub organization_id: OrganizationId,
    pub name: String,
}

impl StockLocation {
    pub fn new(organization_id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            organization_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLocationFilter {
    pub name_contains: Option<String>,
}

impl Entity for StockLocation {
    type Id = LocationId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl OrganizationOwned for StockLocation {
    type Filter = StockLocationFilter;

    const KIND: &'static str = "stock_location";

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn assign_organization(&mut self, organization_id: OrganizationId) {
        self.organization_id = organization_id;
    }

    fn assign_id(&mut self, id: Self::Id) {
        self.id = id;
    }

    fn matches(&self, filter: &Self::Filter) -> bool {
        name_matches(&self.name, filter.name_contains.as_deref())
    }

    fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }
        Ok(())
    }
}

fn name_matches(name: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(n) => name.to_lowercase().contains(&n.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_filter_combines_active_flag_and_name() {
        let mut item = StockItem::new(OrganizationId::new(), "Bread Flour", "kg");
        let filter = StockItemFilter {
            active: Some(true),
            name_contains: Some("flour".to_string()),
        };
        assert!(item.matches(&filter));

        item.active = false;
        assert!(!item.matches(&filter));
        assert!(item.matches(&StockItemFilter::default()));
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(StockItem::new(OrganizationId::new(), "  ", "kg").validate().is_err());
        assert!(StockItem::new(OrganizationId::new(), "Lager", "").validate().is_err());
        assert!(StockLocation::new(OrganizationId::new(), "").validate().is_err());
        assert!(StockLocation::new(OrganizationId::new(), "Walk-in").validate().is_ok());
    }
}

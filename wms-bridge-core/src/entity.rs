//! Identity types: scopes, entity kinds, upload flows and entity keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant/company partition. Every record, watermark and status row is namespaced by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Scope(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural key of one synchronisable record within a scope and entity kind.
///
/// Composite keys are joined with `/` in key-field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Builds a key from its parts. Returns `None` when any part is empty or zero,
    /// since such records can never be addressed in the destination.
    pub fn from_parts<I, S>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        let mut count = 0;
        for part in parts {
            let part = part.as_ref().trim();
            if part.is_empty() || part == "0" {
                return None;
            }
            if count > 0 {
                joined.push('/');
            }
            joined.push_str(part);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(EntityKey(joined))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The six entity types pushed from the ERP into the WMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    ItemGroup,
    Customer,
    Supplier,
    SalesOrder,
    PurchaseOrder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::ItemGroup,
        EntityKind::Item,
        EntityKind::Customer,
        EntityKind::Supplier,
        EntityKind::SalesOrder,
        EntityKind::PurchaseOrder,
    ];

    /// Job name, watermark entity-type and config key.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Item => "items",
            EntityKind::ItemGroup => "item_groups",
            EntityKind::Customer => "customers",
            EntityKind::Supplier => "suppliers",
            EntityKind::SalesOrder => "sales_orders",
            EntityKind::PurchaseOrder => "purchase_orders",
        }
    }

    pub fn status_table(&self) -> &'static str {
        match self {
            EntityKind::Item => "sync_status_items",
            EntityKind::ItemGroup => "sync_status_item_groups",
            EntityKind::Customer => "sync_status_customers",
            EntityKind::Supplier => "sync_status_suppliers",
            EntityKind::SalesOrder => "sync_status_sales_orders",
            EntityKind::PurchaseOrder => "sync_status_purchase_orders",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse-direction flows: completed WMS work pushed back into the ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFlow {
    /// Shipped WMS orders become ERP goods deliveries.
    Shipments,
    /// Received WMS purchase receipts become ERP goods receipts.
    Receipts,
}

impl UploadFlow {
    pub const ALL: [UploadFlow; 2] = [UploadFlow::Shipments, UploadFlow::Receipts];

    pub fn name(&self) -> &'static str {
        match self {
            UploadFlow::Shipments => "shipments",
            UploadFlow::Receipts => "receipts",
        }
    }

    pub fn status_table(&self) -> &'static str {
        match self {
            UploadFlow::Shipments => "upload_status_shipments",
            UploadFlow::Receipts => "upload_status_receipts",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for UploadFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rejects_empty_and_zero_parts() {
        assert!(EntityKey::from_parts(["", "A"]).is_none());
        assert!(EntityKey::from_parts(["0"]).is_none());
        assert!(EntityKey::from_parts(Vec::<String>::new()).is_none());
        assert!(EntityKey::from_parts(["  "]).is_none());
    }

    #[test]
    fn key_joins_composite_parts() {
        let key = EntityKey::from_parts(["WH1", "ITEM-9"]).expect("valid key");
        assert_eq!(key.as_str(), "WH1/ITEM-9");
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(UploadFlow::from_name("receipts"), Some(UploadFlow::Receipts));
        assert_eq!(EntityKind::from_name("invoices"), None);
    }
}

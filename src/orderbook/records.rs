//! Order record catalog
//!
//! A secondary store of resting orders used for per-owner listing, cancel-by-id and
//! audit. The books stay the source of truth for matching; the catalog is mirrored
//! on every insert and delete and may lag behind when a mirror call fails.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::orderbook::types::{Order, OrderKey, OwnerId, RestingOrder};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Catalog entry for a resting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub key: OrderKey,
    #[serde(flatten)]
    pub order: Order,
}

impl OrderRecord {
    pub fn new(key: OrderKey, order: Order) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            order,
        }
    }
}

impl From<RestingOrder> for OrderRecord {
    fn from(resting: RestingOrder) -> Self {
        OrderRecord::new(resting.key, resting.order)
    }
}

/// Contract of the catalog. Deletes of unknown keys succeed.
pub trait OrderRecords: Send + Sync {
    fn insert(&self, record: OrderRecord) -> Result<(), RecordError>;

    fn delete_by_key(&self, key: &OrderKey) -> Result<(), RecordError>;

    fn find_by_owner(&self, owner_id: OwnerId) -> Result<Vec<OrderRecord>, RecordError>;

    /// Returns whether a record was removed.
    fn delete_by_owner_and_key(&self, owner_id: OwnerId, key: &OrderKey)
        -> Result<bool, RecordError>;

    fn find_by_id(&self, id: &Uuid) -> Result<Option<OrderRecord>, RecordError>;

    fn all(&self) -> Result<Vec<OrderRecord>, RecordError>;
}

/// In-process catalog.
#[derive(Debug, Default)]
pub struct InMemoryOrderRecords {
    by_key: DashMap<OrderKey, OrderRecord>,
    ids: DashMap<Uuid, OrderKey>,
}

impl InMemoryOrderRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl OrderRecords for InMemoryOrderRecords {
    fn insert(&self, record: OrderRecord) -> Result<(), RecordError> {
        let key = record.key;
        let id = record.id;
        if let Some(previous) = self.by_key.insert(key, record) {
            self.ids.remove(&previous.id);
        }
        self.ids.insert(id, key);
        Ok(())
    }

    fn delete_by_key(&self, key: &OrderKey) -> Result<(), RecordError> {
        if let Some((_, record)) = self.by_key.remove(key) {
            self.ids.remove(&record.id);
        }
        Ok(())
    }

    fn find_by_owner(&self, owner_id: OwnerId) -> Result<Vec<OrderRecord>, RecordError> {
        let mut records: Vec<OrderRecord> = self
            .by_key
            .iter()
            .filter(|entry| entry.value().order.owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.order.created_at);
        Ok(records)
    }

    fn delete_by_owner_and_key(
        &self,
        owner_id: OwnerId,
        key: &OrderKey,
    ) -> Result<bool, RecordError> {
        match self
            .by_key
            .remove_if(key, |_, record| record.order.owner_id == owner_id)
        {
            Some((_, record)) => {
                self.ids.remove(&record.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<OrderRecord>, RecordError> {
        let Some(key) = self.ids.get(id).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.by_key.get(&key).map(|entry| entry.value().clone()))
    }

    fn all(&self) -> Result<Vec<OrderRecord>, RecordError> {
        Ok(self.by_key.iter().map(|entry| entry.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::codec::encode_key;
    use crate::orderbook::types::Side;

    fn record(owner_id: OwnerId, created_at: u64) -> OrderRecord {
        let price = "10".parse().unwrap();
        let key = encode_key(Side::Sell, &price, created_at, owner_id).unwrap();
        OrderRecord::new(
            key,
            Order {
                side: Side::Sell,
                price,
                owner_id,
                created_at,
                ttl: None,
            },
        )
    }

    #[test]
    fn test_insert_and_find_by_owner() {
        let records = InMemoryOrderRecords::new();
        records.insert(record(1, 30)).unwrap();
        records.insert(record(1, 10)).unwrap();
        records.insert(record(2, 20)).unwrap();

        let mine = records.find_by_owner(1).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].order.created_at, 10);
        assert_eq!(mine[1].order.created_at, 30);
        assert!(records.find_by_owner(3).unwrap().is_empty());
    }

    #[test]
    fn test_deletes_are_idempotent() {
        let records = InMemoryOrderRecords::new();
        let r = record(1, 10);
        let key = r.key;
        records.insert(r).unwrap();

        records.delete_by_key(&key).unwrap();
        records.delete_by_key(&key).unwrap();
        assert!(records.is_empty());
        assert!(!records.delete_by_owner_and_key(1, &key).unwrap());
    }

    #[test]
    fn test_delete_by_owner_checks_owner() {
        let records = InMemoryOrderRecords::new();
        let r = record(1, 10);
        let key = r.key;
        let id = r.id;
        records.insert(r).unwrap();

        assert!(!records.delete_by_owner_and_key(2, &key).unwrap());
        assert_eq!(records.len(), 1);
        assert!(records.delete_by_owner_and_key(1, &key).unwrap());
        assert_eq!(records.find_by_id(&id).unwrap(), None);
    }

    #[test]
    fn test_find_by_id() {
        let records = InMemoryOrderRecords::new();
        let r = record(5, 10);
        let id = r.id;
        records.insert(r.clone()).unwrap();

        assert_eq!(records.find_by_id(&id).unwrap(), Some(r));
        assert_eq!(records.find_by_id(&Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_record_serializes_flat() {
        let r = record(5, 10);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["owner_id"], 5);
        assert_eq!(json["side"], "Sell");
        assert_eq!(json["key"], r.key.to_hex());
    }
}

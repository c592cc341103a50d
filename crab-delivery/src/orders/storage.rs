//! redb-based storage layer for delivery orders
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `DeliveryOrder` | Order records (versioned) |
//! | `vendor_index` | `vendor_order_id` | `order_id` | 平台订单号索引 |
//! | `store_time_index` | `(store_id, order_time, order_id)` | `()` | 按下单时间的门店订单索引 |
//! | `status_index` | `(store_id, status, order_id)` | `()` | 按状态的门店订单索引 |
//! | `pending_push_index` | `(store_id, order_id)` | `()` | 有待补推状态的订单 |
//! | `stop_list` | `(store_id, kind, item_id)` | `StopListEntry` | 停售列表 |
//! | `remediation_occurrences` | `occurrence_key` | applied_at | 补救去重 |
//!
//! # Conditional writes
//!
//! 每条订单记录带 `version`。`compare_and_save` 在同一个写事务里读取当前版本、
//! 比较、写入；redb 的写事务是串行的，因此比较和写入之间不会插入其他写者。
//! 三个门店索引在同一个写事务里随订单记录一起维护。

use async_trait::async_trait;
use redb::{
    Database, ReadOnlyTable, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use shared::order::{DeliveryOrder, OrderStatus};
use shared::{ItemKind, StopListEntry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::store::{OrderStore, StopListStore};

/// Table for order records: key = order_id, value = JSON-serialized DeliveryOrder
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Table for vendor lookups: key = vendor_order_id, value = order_id
const VENDOR_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("vendor_index");

/// Table for per-store time range scans: key = (store_id, order_time, order_id), value = empty
const STORE_TIME_INDEX_TABLE: TableDefinition<(&str, i64, &str), ()> =
    TableDefinition::new("store_time_index");

/// Table for per-store status lookups: key = (store_id, status, order_id), value = empty
const STATUS_INDEX_TABLE: TableDefinition<(&str, &str, &str), ()> =
    TableDefinition::new("status_index");

/// Table for orders owing a push: key = (store_id, order_id), value = empty
const PENDING_PUSH_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("pending_push_index");

/// Table for stop list: key = (store_id, item_kind, item_id), value = JSON-serialized StopListEntry
const STOP_LIST_TABLE: TableDefinition<(&str, &str, &str), &[u8]> =
    TableDefinition::new("stop_list");

/// Table for applied remediations: key = occurrence key, value = applied_at millis
const OCCURRENCES_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("remediation_occurrences");

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order already exists: {0}")]
    DuplicateOrder(String),

    #[error("Version conflict on order {order_id}: expected {expected}, found {actual}")]
    Conflict {
        order_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Rejected write to order {order_id}: {reason}")]
    InvariantViolation { order_id: String, reason: String },

    #[error("Order store deadline exceeded after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate` by default: a record is
    /// persistent as soon as `commit()` returns.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        // Create all tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(VENDOR_INDEX_TABLE)?;
            let _ = write_txn.open_table(STORE_TIME_INDEX_TABLE)?;
            let _ = write_txn.open_table(STATUS_INDEX_TABLE)?;
            let _ = write_txn.open_table(PENDING_PUSH_TABLE)?;
            let _ = write_txn.open_table(STOP_LIST_TABLE)?;
            let _ = write_txn.open_table(OCCURRENCES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Order Operations ==========

    /// Get an order by internal ID
    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get an order by vendor order ID
    pub fn get_order_by_vendor_id(
        &self,
        vendor_order_id: &str,
    ) -> StorageResult<Option<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(VENDOR_INDEX_TABLE)?;
        let Some(order_id) = index.get(vendor_order_id)?.map(|g| g.value().to_string()) else {
            return Ok(None);
        };

        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Option<DeliveryOrder>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_order_txn(&self, txn: &WriteTransaction, order: &DeliveryOrder) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Keep the store indexes in step with an order write
    fn reindex_txn(
        &self,
        txn: &WriteTransaction,
        previous: Option<&DeliveryOrder>,
        next: &DeliveryOrder,
    ) -> StorageResult<()> {
        let store_id = next.store_id.as_str();
        let order_id = next.id.as_str();

        let mut time_index = txn.open_table(STORE_TIME_INDEX_TABLE)?;
        let mut status_index = txn.open_table(STATUS_INDEX_TABLE)?;
        let mut pending_index = txn.open_table(PENDING_PUSH_TABLE)?;

        if let Some(prev) = previous {
            if prev.order_time != next.order_time {
                time_index.remove((prev.store_id.as_str(), prev.order_time, order_id))?;
            }
            if prev.status != next.status {
                status_index.remove((prev.store_id.as_str(), prev.status.as_str(), order_id))?;
            }
        }
        time_index.insert((store_id, next.order_time, order_id), ())?;
        status_index.insert((store_id, next.status.as_str(), order_id), ())?;
        if next.propagated.has_pending() {
            pending_index.insert((store_id, order_id), ())?;
        } else {
            pending_index.remove((store_id, order_id))?;
        }
        Ok(())
    }

    /// Load the orders behind a list of index hits
    fn load_orders(
        &self,
        table: &ReadOnlyTable<&'static str, &'static [u8]>,
        order_ids: &[String],
    ) -> StorageResult<Vec<DeliveryOrder>> {
        let mut orders = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            if let Some(value) = table.get(order_id.as_str())? {
                orders.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(orders)
    }

    /// Insert a new order record
    pub fn insert_order(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder> {
        let txn = self.db.begin_write()?;
        if self.get_order_txn(&txn, &order.id)?.is_some() {
            return Err(StorageError::DuplicateOrder(order.id.clone()));
        }

        self.put_order_txn(&txn, order)?;
        {
            let mut vendor_index = txn.open_table(VENDOR_INDEX_TABLE)?;
            vendor_index.insert(order.vendor_order_id.as_str(), order.id.as_str())?;
        }
        self.reindex_txn(&txn, None, order)?;
        txn.commit()?;

        tracing::debug!(order_id = %order.id, vendor_order_id = %order.vendor_order_id, "Order inserted");
        Ok(order.clone())
    }

    /// Conditional write keyed on `version`
    ///
    /// Also refuses writes that would shrink or rewrite the status history or
    /// lower the retry count.
    pub fn save_if_version(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder> {
        let txn = self.db.begin_write()?;
        let current = self
            .get_order_txn(&txn, &order.id)?
            .ok_or_else(|| StorageError::OrderNotFound(order.id.clone()))?;

        if current.version != order.version {
            return Err(StorageError::Conflict {
                order_id: order.id.clone(),
                expected: order.version,
                actual: current.version,
            });
        }
        check_append_only(&current, order)?;

        let mut saved = order.clone();
        saved.version = current.version + 1;
        saved.updated_at = shared::util::now_millis();
        self.put_order_txn(&txn, &saved)?;
        self.reindex_txn(&txn, Some(&current), &saved)?;
        txn.commit()?;

        Ok(saved)
    }

    /// Orders of a store with `order_time >= since`, oldest first
    ///
    /// Range scan over the time index; orders before `since` are never read.
    pub fn get_store_orders(&self, store_id: &str, since: i64) -> StorageResult<Vec<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(STORE_TIME_INDEX_TABLE)?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut order_ids = Vec::new();
        for result in index.range((store_id, since, "")..)? {
            let (key, _value) = result?;
            let (key_store, _order_time, order_id) = key.value();
            if key_store != store_id {
                break;
            }
            order_ids.push(order_id.to_string());
        }
        self.load_orders(&table, &order_ids)
    }

    /// Orders of a store currently in one of `statuses`, oldest first
    pub fn get_store_orders_in_status(
        &self,
        store_id: &str,
        statuses: &[OrderStatus],
    ) -> StorageResult<Vec<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(STATUS_INDEX_TABLE)?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut order_ids = Vec::new();
        for status in statuses {
            let status = status.as_str();
            for result in index.range((store_id, status, "")..)? {
                let (key, _value) = result?;
                let (key_store, key_status, order_id) = key.value();
                if key_store != store_id || key_status != status {
                    break;
                }
                order_ids.push(order_id.to_string());
            }
        }

        let mut orders = self.load_orders(&table, &order_ids)?;
        orders.sort_by_key(|o| o.order_time);
        Ok(orders)
    }

    /// Orders of a store with a pending push
    pub fn get_pending_push_orders(&self, store_id: &str) -> StorageResult<Vec<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PENDING_PUSH_TABLE)?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut order_ids = Vec::new();
        for result in index.range((store_id, "")..)? {
            let (key, _value) = result?;
            let (key_store, order_id) = key.value();
            if key_store != store_id {
                break;
            }
            order_ids.push(order_id.to_string());
        }
        self.load_orders(&table, &order_ids)
    }

    // ========== Stop List ==========

    /// Check whether a remediation occurrence has been applied
    pub fn is_occurrence_recorded(&self, occurrence_key: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OCCURRENCES_TABLE)?;
        Ok(table.get(occurrence_key)?.is_some())
    }

    /// Write a stop-list entry together with its occurrence marker
    ///
    /// Returns `false` without writing when the occurrence is already recorded.
    pub fn put_suspension(
        &self,
        occurrence_key: &str,
        entry: &StopListEntry,
    ) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        {
            let mut occurrences = txn.open_table(OCCURRENCES_TABLE)?;
            if occurrences.get(occurrence_key)?.is_some() {
                return Ok(false);
            }
            occurrences.insert(occurrence_key, entry.updated_at)?;

            let mut stop_list = txn.open_table(STOP_LIST_TABLE)?;
            let value = serde_json::to_vec(entry)?;
            stop_list.insert(
                (
                    entry.store_id.as_str(),
                    entry.item_kind.as_str(),
                    entry.item_id.as_str(),
                ),
                value.as_slice(),
            )?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Mark a stop-list entry as no longer suspended
    pub fn clear_suspension(
        &self,
        store_id: &str,
        item_id: &str,
        kind: ItemKind,
    ) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let restored = {
            let mut stop_list = txn.open_table(STOP_LIST_TABLE)?;
            let key = (store_id, kind.as_str(), item_id);
            let existing: Option<StopListEntry> = match stop_list.get(key)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            match existing {
                Some(mut entry) => {
                    entry.suspended = false;
                    entry.updated_at = shared::util::now_millis();
                    let value = serde_json::to_vec(&entry)?;
                    stop_list.insert(key, value.as_slice())?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(restored)
    }

    /// All stop-list entries of a store
    pub fn get_stop_list(&self, store_id: &str) -> StorageResult<Vec<StopListEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STOP_LIST_TABLE)?;

        let mut entries = Vec::new();
        for result in table.range((store_id, "", "")..)? {
            let (key, value) = result?;
            if key.value().0 != store_id {
                break;
            }
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // ========== Statistics ==========

    /// Get storage statistics
    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        let read_txn = self.db.begin_read()?;

        let orders_table = read_txn.open_table(ORDERS_TABLE)?;
        let stop_list_table = read_txn.open_table(STOP_LIST_TABLE)?;
        let occurrences_table = read_txn.open_table(OCCURRENCES_TABLE)?;

        Ok(StorageStats {
            order_count: orders_table.len()?,
            stop_list_count: stop_list_table.len()?,
            occurrence_count: occurrences_table.len()?,
        })
    }
}

/// History is append-only and retry_count never decreases
fn check_append_only(current: &DeliveryOrder, next: &DeliveryOrder) -> StorageResult<()> {
    let violation = |reason: String| StorageError::InvariantViolation {
        order_id: next.id.clone(),
        reason,
    };

    let stored = current.status_history.len();
    if next.status_history.len() < stored
        || next.status_history[..stored] != current.status_history[..]
    {
        return Err(violation(format!(
            "status history rewritten ({} stored entries, {} submitted)",
            stored,
            next.status_history.len()
        )));
    }
    if next.retry_count < current.retry_count {
        return Err(violation(format!(
            "retry_count decreased from {} to {}",
            current.retry_count, next.retry_count
        )));
    }
    Ok(())
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub order_count: u64,
    pub stop_list_count: u64,
    pub occurrence_count: u64,
}

// ========== Trait implementations ==========

#[async_trait]
impl OrderStore for OrderStorage {
    async fn get(&self, order_id: &str) -> StorageResult<Option<DeliveryOrder>> {
        self.get_order(order_id)
    }

    async fn find_by_vendor_id(
        &self,
        vendor_order_id: &str,
    ) -> StorageResult<Option<DeliveryOrder>> {
        self.get_order_by_vendor_id(vendor_order_id)
    }

    async fn insert(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder> {
        self.insert_order(order)
    }

    async fn compare_and_save(&self, order: &DeliveryOrder) -> StorageResult<DeliveryOrder> {
        self.save_if_version(order)
    }

    async fn list_store_orders(
        &self,
        store_id: &str,
        since: i64,
    ) -> StorageResult<Vec<DeliveryOrder>> {
        self.get_store_orders(store_id, since)
    }

    async fn list_store_orders_in_status(
        &self,
        store_id: &str,
        statuses: &[OrderStatus],
    ) -> StorageResult<Vec<DeliveryOrder>> {
        self.get_store_orders_in_status(store_id, statuses)
    }

    async fn list_pending_push(&self, store_id: &str) -> StorageResult<Vec<DeliveryOrder>> {
        self.get_pending_push_orders(store_id)
    }
}

#[async_trait]
impl StopListStore for OrderStorage {
    async fn is_occurrence_applied(&self, occurrence_key: &str) -> StorageResult<bool> {
        self.is_occurrence_recorded(occurrence_key)
    }

    async fn record_suspension(
        &self,
        occurrence_key: &str,
        entry: &StopListEntry,
    ) -> StorageResult<bool> {
        self.put_suspension(occurrence_key, entry)
    }

    async fn restore(&self, store_id: &str, item_id: &str, kind: ItemKind) -> StorageResult<bool> {
        self.clear_suspension(store_id, item_id, kind)
    }

    async fn stop_list(&self, store_id: &str) -> StorageResult<Vec<StopListEntry>> {
        self.get_stop_list(store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::{StatusHistoryEntry, TransitionSource};

    fn create_test_order(store_id: &str, vendor_id: &str, order_time: i64) -> DeliveryOrder {
        DeliveryOrder::new(store_id, vendor_id, "A1", "iiko", "glovo", order_time)
    }

    fn create_test_entry(store_id: &str, item_id: &str) -> StopListEntry {
        StopListEntry {
            store_id: store_id.to_string(),
            item_id: item_id.to_string(),
            item_kind: ItemKind::Product,
            suspended: true,
            item_name: Some("Margherita".to_string()),
            reason_code: Some("21".to_string()),
            updated_at: 1_000,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = create_test_order("s1", "glovo-1", 1_000);
        storage.insert_order(&order).unwrap();

        assert_eq!(storage.get_order(&order.id).unwrap(), Some(order.clone()));
        assert_eq!(
            storage.get_order_by_vendor_id("glovo-1").unwrap().map(|o| o.id),
            Some(order.id.clone())
        );
        assert!(storage.get_order_by_vendor_id("glovo-2").unwrap().is_none());

        let err = storage.insert_order(&order).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateOrder(_)));
    }

    #[test]
    fn test_save_bumps_version() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = storage
            .insert_order(&create_test_order("s1", "v1", 1_000))
            .unwrap();

        let mut next = order.clone();
        next.is_retry = true;
        let saved = storage.save_if_version(&next).unwrap();
        assert_eq!(saved.version, 1);
        assert!(storage.get_order(&order.id).unwrap().unwrap().is_retry);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = storage
            .insert_order(&create_test_order("s1", "v1", 1_000))
            .unwrap();

        // Two writers read version 0
        let first = order.clone();
        let second = order.clone();
        storage.save_if_version(&first).unwrap();

        let err = storage.save_if_version(&second).unwrap_err();
        assert!(err.is_conflict());
        match err {
            StorageError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_history_cannot_shrink() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let mut order = create_test_order("s1", "v1", 1_000);
        order.status_history.push(StatusHistoryEntry {
            status: OrderStatus::Accepted,
            timestamp: 2_000,
            source: TransitionSource::Pos,
            note: None,
        });
        order.status = OrderStatus::Accepted;
        let order = storage.insert_order(&order).unwrap();

        let mut truncated = order.clone();
        truncated.status_history.pop();
        let err = storage.save_if_version(&truncated).unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation { .. }));

        let mut reordered = order.clone();
        reordered.status_history.reverse();
        assert!(storage.save_if_version(&reordered).is_err());
    }

    #[test]
    fn test_retry_count_cannot_decrease() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let mut order = create_test_order("s1", "v1", 1_000);
        order.retry_count = 2;
        let order = storage.insert_order(&order).unwrap();

        let mut lowered = order.clone();
        lowered.retry_count = 1;
        assert!(matches!(
            storage.save_if_version(&lowered).unwrap_err(),
            StorageError::InvariantViolation { .. }
        ));
    }

    #[test]
    fn test_missing_order_on_save() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = create_test_order("s1", "v1", 1_000);
        assert!(matches!(
            storage.save_if_version(&order).unwrap_err(),
            StorageError::OrderNotFound(_)
        ));
    }

    #[test]
    fn test_store_orders_filters_by_store_and_time() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.insert_order(&create_test_order("s1", "v1", 1_000)).unwrap();
        storage.insert_order(&create_test_order("s1", "v2", 5_000)).unwrap();
        storage.insert_order(&create_test_order("s10", "v3", 5_000)).unwrap();
        storage.insert_order(&create_test_order("s2", "v4", 5_000)).unwrap();

        let orders = storage.get_store_orders("s1", 2_000).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].vendor_order_id, "v2");

        assert_eq!(storage.get_store_orders("s1", 0).unwrap().len(), 2);
        assert!(storage.get_store_orders("s3", 0).unwrap().is_empty());
    }

    #[test]
    fn test_store_orders_come_back_oldest_first() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.insert_order(&create_test_order("s1", "late", 9_000)).unwrap();
        storage.insert_order(&create_test_order("s1", "early", 3_000)).unwrap();
        storage.insert_order(&create_test_order("s1", "before", -5)).unwrap();

        let vendor_ids: Vec<String> = storage
            .get_store_orders("s1", 0)
            .unwrap()
            .into_iter()
            .map(|o| o.vendor_order_id)
            .collect();
        assert_eq!(vendor_ids, vec!["early".to_string(), "late".to_string()]);
        assert_eq!(storage.get_store_orders("s1", i64::MIN).unwrap().len(), 3);
    }

    #[test]
    fn test_status_index_follows_saves() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = storage
            .insert_order(&create_test_order("s1", "v1", 1_000))
            .unwrap();
        storage.insert_order(&create_test_order("s2", "v2", 1_000)).unwrap();

        let new_orders = storage
            .get_store_orders_in_status("s1", &[OrderStatus::New])
            .unwrap();
        assert_eq!(new_orders.len(), 1);

        let mut accepted = order.clone();
        accepted.status = OrderStatus::Accepted;
        storage.save_if_version(&accepted).unwrap();

        assert!(storage
            .get_store_orders_in_status("s1", &[OrderStatus::New])
            .unwrap()
            .is_empty());
        let found = storage
            .get_store_orders_in_status("s1", &[OrderStatus::New, OrderStatus::Accepted])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, OrderStatus::Accepted);
    }

    #[test]
    fn test_pending_push_index_follows_marks() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let order = storage
            .insert_order(&create_test_order("s1", "v1", 1_000))
            .unwrap();
        assert!(storage.get_pending_push_orders("s1").unwrap().is_empty());

        let mut owing = order.clone();
        owing.propagated.pending_aggregator = Some(OrderStatus::New);
        let owing = storage.save_if_version(&owing).unwrap();
        assert_eq!(storage.get_pending_push_orders("s1").unwrap().len(), 1);

        let mut settled = owing.clone();
        settled.propagated.pending_aggregator = None;
        settled.propagated.aggregator = Some(OrderStatus::New);
        storage.save_if_version(&settled).unwrap();
        assert!(storage.get_pending_push_orders("s1").unwrap().is_empty());
    }

    #[test]
    fn test_suspension_recorded_once_per_occurrence() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let entry = create_test_entry("s1", "4711");

        assert!(!storage.is_occurrence_recorded("occ-1").unwrap());
        assert!(storage.put_suspension("occ-1", &entry).unwrap());
        assert!(storage.is_occurrence_recorded("occ-1").unwrap());
        assert!(!storage.put_suspension("occ-1", &entry).unwrap());

        let list = storage.get_stop_list("s1").unwrap();
        assert_eq!(list, vec![entry]);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.stop_list_count, 1);
        assert_eq!(stats.occurrence_count, 1);
    }

    #[test]
    fn test_clear_suspension() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage
            .put_suspension("occ-1", &create_test_entry("s1", "4711"))
            .unwrap();

        assert!(storage.clear_suspension("s1", "4711", ItemKind::Product).unwrap());
        assert!(!storage.get_stop_list("s1").unwrap()[0].suspended);
        assert!(!storage.clear_suspension("s1", "4711", ItemKind::Attribute).unwrap());
        assert!(!storage.clear_suspension("s2", "4711", ItemKind::Product).unwrap());
    }

    #[test]
    fn test_file_backed_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.redb");
        let order = create_test_order("s1", "v1", 1_000);
        {
            let storage = OrderStorage::open(&path).unwrap();
            storage.insert_order(&order).unwrap();
        }
        let storage = OrderStorage::open(&path).unwrap();
        assert_eq!(storage.get_order(&order.id).unwrap(), Some(order));
    }
}

//! 集成测试公共设施：内存订单库 + 记录调用的 mock 适配器

#![allow(dead_code)]

use async_trait::async_trait;
use crab_delivery::adapters::{
    AdapterError, AdapterRegistry, AdapterResult, AggregatorAdapter, OperatorNotice,
    OperatorNotifier, PosAdapter,
};
use crab_delivery::orders::{ErrorResolver, OrderStorage, Propagator};
use crab_delivery::reference::{ReferenceResult, ReferenceSource};
use crab_delivery::{Config, Reconciler};
use shared::order::{DeliveryOrder, FailReason, FailureClass, OrderStatus};
use shared::{ErrorSolution, ItemKind, RemediationKind, StoreRetryPolicy};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const STORE_ID: &str = "store-1";
pub const POS_TYPE: &str = "iiko";
pub const DELIVERY_SERVICE: &str = "glovo";

// ============================================================================
// Mock POS
// ============================================================================

#[derive(Default)]
pub struct MockPos {
    pub created: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<(String, OrderStatus)>>,
    pub closed: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
    create_results: Mutex<VecDeque<AdapterResult<String>>>,
    failing_closes: Mutex<HashSet<String>>,
    fail_cancel: Mutex<bool>,
}

impl MockPos {
    pub fn push_create_result(&self, result: AdapterResult<String>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn fail_close_for(&self, pos_order_id: &str) {
        self.failing_closes
            .lock()
            .unwrap()
            .insert(pos_order_id.to_string());
    }

    pub fn fail_cancels(&self) {
        *self.fail_cancel.lock().unwrap() = true;
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn status_calls(&self) -> Vec<(String, OrderStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl PosAdapter for MockPos {
    async fn create_order(&self, order: &DeliveryOrder) -> AdapterResult<String> {
        self.created.lock().unwrap().push(order.id.clone());
        let scripted = self.create_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("pos-{}", order.vendor_order_id)))
    }

    async fn update_status(
        &self,
        pos_order_id: &str,
        status: OrderStatus,
        _reason: Option<&str>,
    ) -> AdapterResult<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((pos_order_id.to_string(), status));
        Ok(())
    }

    async fn close_order(&self, pos_order_id: &str) -> AdapterResult<()> {
        if self.failing_closes.lock().unwrap().contains(pos_order_id) {
            return Err(AdapterError::Transient("POS close rejected".into()));
        }
        self.closed.lock().unwrap().push(pos_order_id.to_string());
        Ok(())
    }

    async fn cancel_order(&self, pos_order_id: &str, reason: &str) -> AdapterResult<()> {
        if *self.fail_cancel.lock().unwrap() {
            return Err(AdapterError::Transient("POS unreachable".into()));
        }
        self.cancelled
            .lock()
            .unwrap()
            .push((pos_order_id.to_string(), reason.to_string()));
        Ok(())
    }
}

// ============================================================================
// Mock Aggregator
// ============================================================================

#[derive(Default)]
pub struct MockAggregator {
    pub statuses: Mutex<Vec<(String, String, OrderStatus)>>,
    pub suspended: Mutex<Vec<(String, String, ItemKind)>>,
    pub restored: Mutex<Vec<(String, String, ItemKind)>>,
    suspend_error: Mutex<Option<AdapterError>>,
    status_error: Mutex<Option<AdapterError>>,
    requires_ack: bool,
}

impl MockAggregator {
    pub fn with_accept_ack() -> Self {
        Self {
            requires_ack: true,
            ..Default::default()
        }
    }

    pub fn fail_suspensions(&self, error: AdapterError) {
        *self.suspend_error.lock().unwrap() = Some(error);
    }

    /// `None` restores normal status updates
    pub fn fail_status_updates(&self, error: Option<AdapterError>) {
        *self.status_error.lock().unwrap() = error;
    }

    pub fn status_calls(&self) -> Vec<OrderStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, status)| *status)
            .collect()
    }

    pub fn suspend_calls(&self) -> usize {
        self.suspended.lock().unwrap().len()
    }
}

#[async_trait]
impl AggregatorAdapter for MockAggregator {
    async fn update_order_status(
        &self,
        store_id: &str,
        vendor_order_id: &str,
        status: OrderStatus,
    ) -> AdapterResult<()> {
        if let Some(error) = self.status_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.statuses.lock().unwrap().push((
            store_id.to_string(),
            vendor_order_id.to_string(),
            status,
        ));
        Ok(())
    }

    async fn suspend_item(&self, store_id: &str, item_id: &str, kind: ItemKind) -> AdapterResult<()> {
        if let Some(error) = self.suspend_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.suspended
            .lock()
            .unwrap()
            .push((store_id.to_string(), item_id.to_string(), kind));
        Ok(())
    }

    async fn restore_item(&self, store_id: &str, item_id: &str, kind: ItemKind) -> AdapterResult<()> {
        self.restored
            .lock()
            .unwrap()
            .push((store_id.to_string(), item_id.to_string(), kind));
        Ok(())
    }

    fn requires_accept_ack(&self) -> bool {
        self.requires_ack
    }
}

// ============================================================================
// Mock Notifier / Reference
// ============================================================================

#[derive(Default)]
pub struct MockNotifier {
    pub notices: Mutex<Vec<OperatorNotice>>,
}

impl MockNotifier {
    pub fn notices(&self) -> Vec<OperatorNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorNotifier for MockNotifier {
    async fn notify(&self, notice: &OperatorNotice) -> AdapterResult<()> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub struct StaticReference {
    pub policies: Vec<StoreRetryPolicy>,
    pub solutions: Vec<ErrorSolution>,
}

#[async_trait]
impl ReferenceSource for StaticReference {
    async fn load_policies(&self) -> ReferenceResult<Vec<StoreRetryPolicy>> {
        Ok(self.policies.clone())
    }

    async fn load_error_solutions(&self) -> ReferenceResult<Vec<ErrorSolution>> {
        Ok(self.solutions.clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn policy(max_retry_count: u32) -> StoreRetryPolicy {
    StoreRetryPolicy::new(STORE_ID, max_retry_count)
}

/// Code 21: product on stop list, operator notified
pub fn stoplist_solution() -> ErrorSolution {
    ErrorSolution {
        code: "21".to_string(),
        match_pattern: r"Product (?P<item>\d+) \((?P<name>[^)]+)\) is not available".to_string(),
        item_pattern: None,
        reason: "Product is on the stop list".to_string(),
        business_description: "Product suspended on the delivery platform".to_string(),
        remediation_kind: RemediationKind::ProductStoplist,
        notify_operator: true,
    }
}

pub const STOPLIST_ERROR: &str = "Product 4711 (Margherita) is not available";

pub fn test_config() -> Config {
    let mut config = Config::with_overrides("/tmp/crab-delivery-tests");
    config.retry_internal_id_sources = ["admin".to_string()].into_iter().collect();
    config.adapter_timeout_ms = 2_000;
    config.store_timeout_ms = 2_000;
    config.auto_close_lookback_hours = 24;
    config.sweep_concurrency = 4;
    config.retry_concurrency = 4;
    config
}

pub fn new_order(vendor_order_id: &str, order_time: i64) -> DeliveryOrder {
    DeliveryOrder::new(
        STORE_ID,
        vendor_order_id,
        "A17",
        POS_TYPE,
        DELIVERY_SERVICE,
        order_time,
    )
}

/// A `FAILED` order from a previous vendor rejection
pub fn failed_order(vendor_order_id: &str, retry_count: u32, message: &str) -> DeliveryOrder {
    let mut order = new_order(vendor_order_id, shared::util::now_millis());
    order.status = OrderStatus::Failed;
    order.retry_count = retry_count;
    order.fail_reason = Some(FailReason {
        code: "21".to_string(),
        message: message.to_string(),
        classification: FailureClass::Business,
        reason: "Product is on the stop list".to_string(),
        remediation_description: None,
    });
    order
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub storage: Arc<OrderStorage>,
    pub pos: Arc<MockPos>,
    pub aggregator: Arc<MockAggregator>,
    pub notifier: Arc<MockNotifier>,
    pub registry: AdapterRegistry,
    pub config: Config,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new(policies: Vec<StoreRetryPolicy>, solutions: Vec<ErrorSolution>) -> Self {
        Self::with_aggregator(policies, solutions, MockAggregator::default())
    }

    pub fn with_aggregator(
        policies: Vec<StoreRetryPolicy>,
        solutions: Vec<ErrorSolution>,
        aggregator: MockAggregator,
    ) -> Self {
        let storage = Arc::new(OrderStorage::open_in_memory().unwrap());
        let pos = Arc::new(MockPos::default());
        let aggregator = Arc::new(aggregator);
        let notifier = Arc::new(MockNotifier::default());
        let registry = AdapterRegistry::new()
            .with_pos(POS_TYPE, pos.clone())
            .with_aggregator(DELIVERY_SERVICE, aggregator.clone());
        let config = test_config();

        let reconciler = Reconciler::new(
            config.clone(),
            storage.clone(),
            storage.clone(),
            registry.clone(),
            notifier.clone(),
            Arc::new(StaticReference {
                policies,
                solutions,
            }),
        );

        Self {
            storage,
            pos,
            aggregator,
            notifier,
            registry,
            config,
            reconciler,
        }
    }

    pub fn seed(&self, order: &DeliveryOrder) -> DeliveryOrder {
        self.storage.insert_order(order).unwrap()
    }

    pub fn load(&self, order_id: &str) -> DeliveryOrder {
        self.storage.get_order(order_id).unwrap().unwrap()
    }

    pub fn propagator(&self) -> Propagator {
        Propagator::new(
            self.storage.clone(),
            self.registry.clone(),
            self.config.adapter_timeout(),
            self.config.store_timeout(),
        )
    }

    pub fn resolver(&self) -> ErrorResolver {
        ErrorResolver::new(
            self.storage.clone(),
            self.storage.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            self.config.adapter_timeout(),
            self.config.store_timeout(),
        )
    }
}

use shared::order::{DeliveryOrder, OrderStatus};
use shared::{ItemKind, StopListEntry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::{AdapterRegistry, OperatorNotifier};
use crate::core::error::{ReconcilerError, Result};
use crate::core::Config;
use crate::orders::intake::{IntakeOutcome, IntakeResult, StatusEvent, StatusIntake};
use crate::orders::propagator::{Propagator, Targets};
use crate::orders::resolution::{ErrorResolver, ResolutionResult};
use crate::orders::retry::{RetryBatch, RetryCoordinator, RetryRequest, RetryResult, RetryOutcome};
use crate::orders::state_machine::force_status;
use crate::orders::storage::OrderStorage;
use crate::orders::store::{OrderRef, OrderStore, StopListStore, with_store_deadline};
use crate::orders::summary::BatchSummary;
use crate::orders::sweep::TransitionSweep;
use crate::reference::{JsonFileSource, ReferenceSnapshot, ReferenceSource};

/// 一次定时扫描的结果
#[derive(Debug)]
pub struct SweepReport {
    pub repropagate: BatchSummary,
    pub auto_ready: BatchSummary,
    pub auto_close: BatchSummary,
}

/// 对账核心 - 持有所有组件的共享引用
///
/// 适配器、存储、参考数据来源在边界处解析一次后注入。每个入口
/// (重试批处理、定时扫描、webhook) 都是独立的短调用，各自加载一份参考数据快照。
///
/// | 字段 | 说明 |
/// |------|------|
/// | store | 订单存储 |
/// | stop_list | 停售列表存储 |
/// | reference | 门店策略 + 错误方案来源 |
/// | propagator | 跨系统推送 |
/// | resolver | 错误解析引擎 |
/// | retry | 重试协调器 |
/// | sweep | 定时扫描 |
/// | intake | 入站状态处理 |
#[derive(Clone)]
pub struct Reconciler {
    config: Config,
    store: Arc<dyn OrderStore>,
    stop_list: Arc<dyn StopListStore>,
    reference: Arc<dyn ReferenceSource>,
    propagator: Propagator,
    resolver: ErrorResolver,
    retry: RetryCoordinator,
    sweep: TransitionSweep,
    intake: StatusIntake,
}

impl Reconciler {
    pub fn new(
        config: Config,
        store: Arc<dyn OrderStore>,
        stop_list: Arc<dyn StopListStore>,
        adapters: AdapterRegistry,
        notifier: Arc<dyn OperatorNotifier>,
        reference: Arc<dyn ReferenceSource>,
    ) -> Self {
        let adapter_timeout = config.adapter_timeout();
        let store_timeout = config.store_timeout();

        let propagator = Propagator::new(
            store.clone(),
            adapters.clone(),
            adapter_timeout,
            store_timeout,
        );
        let resolver = ErrorResolver::new(
            store.clone(),
            stop_list.clone(),
            adapters,
            notifier,
            adapter_timeout,
            store_timeout,
        );
        let retry = RetryCoordinator::new(
            store.clone(),
            resolver.clone(),
            propagator.clone(),
            adapter_timeout,
            store_timeout,
            config.retry_concurrency,
        );
        let sweep = TransitionSweep::new(
            store.clone(),
            propagator.clone(),
            store_timeout,
            config.sweep_concurrency,
            config.lookback_millis(),
        );
        let intake = StatusIntake::new(store.clone(), propagator.clone(), store_timeout);

        Self {
            config,
            store,
            stop_list,
            reference,
            propagator,
            resolver,
            retry,
            sweep,
            intake,
        }
    }

    /// 使用配置中的 redb 订单库和 JSON 参考数据文件
    pub fn open(
        config: Config,
        adapters: AdapterRegistry,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Result<Self> {
        let db_path = config.order_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let storage = Arc::new(OrderStorage::open(&db_path)?);
        let reference = Arc::new(JsonFileSource::new(config.reference_data_path()));
        tracing::info!(
            order_db = %db_path.display(),
            reference = %config.reference_data_path().display(),
            "Reconciler opened"
        );

        Ok(Self::new(
            config,
            storage.clone(),
            storage,
            adapters,
            notifier,
            reference,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 加载一份新的参考数据快照
    pub async fn snapshot(&self) -> Result<ReferenceSnapshot> {
        Ok(ReferenceSnapshot::load(self.reference.as_ref()).await?)
    }

    /// 登记新收到的订单
    pub async fn register_order(&self, order: &DeliveryOrder) -> Result<DeliveryOrder> {
        Ok(with_store_deadline(self.config.store_timeout(), self.store.insert(order)).await?)
    }

    // ========== Retry ==========

    /// 处理一条重试队列消息
    pub async fn handle_retry(&self, raw: &str) -> RetryResult<RetryOutcome> {
        let request = RetryRequest::parse(raw, &self.config.retry_internal_id_sources);
        let snapshot = ReferenceSnapshot::load(self.reference.as_ref()).await?;
        self.retry
            .handle(&request, &snapshot, shared::util::now_millis())
            .await
    }

    /// 批量处理重试队列消息
    pub async fn drain_retries(&self, raws: &[String]) -> Result<RetryBatch> {
        let requests = raws
            .iter()
            .map(|raw| RetryRequest::parse(raw, &self.config.retry_internal_id_sources))
            .collect();
        let snapshot = self.snapshot().await?;
        Ok(self
            .retry
            .drain(requests, &snapshot, shared::util::now_millis())
            .await)
    }

    // ========== Sweep ==========

    /// 定时扫描：补推、auto-ready、auto-close 三个独立批次
    pub async fn run_sweep(&self, now: i64, cancel: &CancellationToken) -> Result<SweepReport> {
        let snapshot = self.snapshot().await?;
        let repropagate = self.sweep.repropagate(&snapshot, cancel).await;
        let auto_ready = self.sweep.auto_ready(&snapshot, now, cancel).await;
        let auto_close = self.sweep.auto_close(&snapshot, now, cancel).await;
        Ok(SweepReport {
            repropagate,
            auto_ready,
            auto_close,
        })
    }

    // ========== Status ==========

    /// 处理入站状态事件
    pub async fn handle_status(&self, event: StatusEvent) -> IntakeResult<IntakeOutcome> {
        self.intake.handle(event).await
    }

    /// 人工覆盖状态 (唯一可以离开终态的入口)，推送到两侧
    pub async fn override_status(
        &self,
        reference: &OrderRef,
        status: OrderStatus,
        operator_note: &str,
    ) -> Result<DeliveryOrder> {
        let store_timeout = self.config.store_timeout();
        let mut order = with_store_deadline(store_timeout, self.store.resolve(reference))
            .await?
            .ok_or_else(|| ReconcilerError::OrderNotFound(reference.to_string()))?;

        force_status(&mut order, status, operator_note, shared::util::now_millis());
        let saved = with_store_deadline(store_timeout, self.store.compare_and_save(&order)).await?;
        Ok(self
            .propagator
            .propagate(saved, status, Targets::BOTH)
            .await
            .order)
    }

    // ========== Stop List ==========

    pub async fn stop_list(&self, store_id: &str) -> Result<Vec<StopListEntry>> {
        Ok(with_store_deadline(self.config.store_timeout(), self.stop_list.stop_list(store_id))
            .await?)
    }

    /// 运营恢复停售商品
    pub async fn restore_item(
        &self,
        store_id: &str,
        delivery_service: &str,
        item_id: &str,
        kind: ItemKind,
    ) -> ResolutionResult<bool> {
        self.resolver
            .restore_item(store_id, delivery_service, item_id, kind)
            .await
    }
}

//! A push through the in-memory store lands on the pool and comes back
//! through the report job.

use std::sync::Arc;

use adaptpool_core::{AdjustMode, PoolConfig, WorkerPool};
use adaptpool_registry::{ConfigCenter, InMemoryRegistry, PoolService, ReportJob};

fn wire() -> (Arc<InMemoryRegistry>, Arc<PoolService>, ReportJob) {
    let registry = Arc::new(InMemoryRegistry::new());
    let service = Arc::new(PoolService::new("orders"));
    let pool = WorkerPool::builder("io", 2, 4).build().unwrap();
    service.register(Arc::new(pool)).unwrap();
    registry.subscribe("orders", service.clone());

    let job = ReportJob::new(registry.clone(), service.clone());
    job.report_initial().unwrap();
    (registry, service, job)
}

#[test]
fn pushed_config_is_applied_and_reported_back() {
    let (registry, service, job) = wire();

    let mut pushed = PoolConfig::new("io", 8, 16);
    pushed.keep_alive_secs = 30;
    pushed.rejection_policy = "DiscardOldestPolicy".to_string();
    pushed.adjust_mode = AdjustMode::Auto;
    assert_eq!(registry.publish("orders", &pushed).unwrap(), 1);

    let pool = service.pool("io").unwrap();
    let live = pool.config();
    assert!(live.same_settings(&pushed));
    assert_eq!(pool.adjust_mode(), AdjustMode::Auto);

    assert_eq!(job.report_once(), 1);
    let stored = registry.fetch_configs("orders").unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].same_settings(&pushed));
    assert!(stored[0].last_update_time > 0);
}

#[test]
fn rejected_push_changes_nothing_and_reports_nothing() {
    let (registry, service, job) = wire();

    assert_eq!(registry.publish("orders", &PoolConfig::new("io", 9, 3)).unwrap(), 1);
    let mut bad_policy = PoolConfig::new("io", 3, 5);
    bad_policy.rejection_policy = "ExplodePolicy".to_string();
    registry.publish("orders", &bad_policy).unwrap();
    registry.publish_raw("orders", "garbage");

    let live = service.pool("io").unwrap().config();
    assert_eq!((live.core_pool_size, live.max_pool_size), (2, 4));
    assert_eq!(live.rejection_policy, "AbortPolicy");
    assert_eq!(job.report_once(), 0);
}

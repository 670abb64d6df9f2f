// DANS : tests/data_flow.rs

mod common;

use common::{MockChain, MockSource, drain, snapshot, test_config};
use pool_monitor::{
    PoolMonitorService,
    config::{DexConfig, ORCA_WHIRLPOOL_PROGRAM_ID, RAYDIUM_CLMM_PROGRAM_ID},
    data_pipeline::{LiquidityHealth, PoolDataSource},
    events::{DataType, MonitorEvent},
    monitoring::AlertKind,
    state::{PoolKey, PoolRecord, Timeframe},
};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::{sync::Arc, time::Duration};

const ORCA: &str = "orca-whirlpool";
const CLMM: &str = "raydium-clmm";

fn service_with(sources: &[Arc<MockSource>]) -> PoolMonitorService {
    let dexes = vec![
        DexConfig::new(ORCA, ORCA_WHIRLPOOL_PROGRAM_ID, "orca"),
        DexConfig::new(CLMM, RAYDIUM_CLMM_PROGRAM_ID, "raydium"),
    ];
    let sources = sources.iter().map(|s| s.clone() as Arc<dyn PoolDataSource>).collect();
    PoolMonitorService::new(test_config(dexes, None), MockChain::new(), sources).unwrap()
}

/// Enregistre le pool comme s'il venait d'être détecté, puis le rafraîchit une première fois.
async fn tracked_pool(service: &PoolMonitorService, dex: &str, address: Pubkey, mints: (Pubkey, Pubkey)) -> PoolKey {
    service.store().insert_if_absent(PoolRecord::detected(dex, address, mints.0, mints.1));
    let key = PoolKey::new(dex, &address);
    service.data_client(dex).unwrap().refresh_pool(&key).await.unwrap();
    key
}

fn mints() -> (Pubkey, Pubkey) {
    (Pubkey::new_unique(), Pubkey::new_unique())
}

#[tokio::test]
async fn consistency_check_overwrites_drifted_cache() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 1.0, 50_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let key = tracked_pool(&service, ORCA, pool, pair).await;
    let mut events = service.subscribe_events();

    source.set(snapshot(ORCA, pool, pair, 1.5, 50_000.0, 100_000));
    let report = service.validator().run_check().await;

    assert_eq!((report.checked, report.inconsistent, report.failed), (1, 1, 0));
    assert_eq!(service.store().record(&key).unwrap().price, 1.5);

    let logged = service.validator().recent_events();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].field_diffs.price.exceeded);
    assert!(!logged[0].field_diffs.volume.exceeded);
    assert!((logged[0].field_diffs.price.relative_difference - 0.5).abs() < 1e-9);

    let published = drain(&mut events);
    assert!(published.iter().any(|e| matches!(e, MonitorEvent::Inconsistency(ev) if ev.pool_key == key)));
    assert!(published.iter().any(|e| matches!(e, MonitorEvent::Alert(a) if a.kind == AlertKind::ConsistencyAlert)));
    assert_eq!(service.metrics().snapshot().consistency_errors, 1);
}

#[tokio::test]
async fn small_drift_is_not_reported() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 1.0, 50_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let key = tracked_pool(&service, ORCA, pool, pair).await;
    let mut events = service.subscribe_events();

    source.set(snapshot(ORCA, pool, pair, 1.02, 52_000.0, 101_000));
    let report = service.validator().run_check().await;

    assert_eq!((report.checked, report.inconsistent), (1, 0));
    // Le cache n'est pas touché sans écart.
    assert_eq!(service.store().record(&key).unwrap().price, 1.0);
    assert!(service.validator().recent_events().is_empty());
    assert!(!drain(&mut events).iter().any(|e| matches!(e, MonitorEvent::Inconsistency(_))));
    assert_eq!(service.metrics().snapshot().consistency_checks, 1);
}

#[tokio::test]
async fn failed_refetch_still_counts_as_a_check() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 1.0, 50_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let key = tracked_pool(&service, ORCA, pool, pair).await;

    source.remove(&pool);
    let report = service.validator().run_check().await;

    assert_eq!((report.checked, report.inconsistent, report.failed), (0, 0, 1));
    let metrics = service.metrics().snapshot();
    assert_eq!((metrics.consistency_checks, metrics.consistency_errors), (1, 0));
    assert_eq!(service.store().record(&key).unwrap().price, 1.0);
}

#[tokio::test]
async fn cross_dex_divergence_is_advisory() {
    let (orca, clmm) = (MockSource::new(ORCA), MockSource::new(CLMM));
    let (orca_pool, clmm_pool, pair) = (Pubkey::new_unique(), Pubkey::new_unique(), mints());
    orca.set(snapshot(ORCA, orca_pool, pair, 1.0, 50_000.0, 100_000));
    // Paire inversée côté CLMM : la recherche ne dépend pas de l'ordre.
    clmm.set(snapshot(CLMM, clmm_pool, (pair.1, pair.0), 1.5, 50_000.0, 80_000));
    let service = service_with(&[orca.clone(), clmm.clone()]);
    let key = tracked_pool(&service, ORCA, orca_pool, pair).await;
    let mut events = service.subscribe_events();

    let report = service.reconciler().run_check().await;

    assert_eq!(report.pools, 1);
    assert_eq!(report.comparisons, 2);
    assert_eq!(report.inconsistencies, 1);
    assert_eq!(service.store().record(&key).unwrap().price, 1.0);

    let table = service.reconciler().cross_dex_data();
    let others = table.get(&key).expect("entrée cross-dex");
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].address, clmm_pool);

    let published = drain(&mut events);
    let divergence = published.iter().find_map(|e| match e {
        MonitorEvent::CrossDexInconsistency(d) => Some(d.clone()),
        _ => None,
    });
    let divergence = divergence.expect("événement cross-dex");
    assert_eq!(divergence.data_type, DataType::Price);
    assert_eq!(divergence.cross_dex, CLMM);
    assert!(!published.iter().any(|e| matches!(e, MonitorEvent::Inconsistency(_))));
}

#[tokio::test]
async fn refresh_emits_change_and_health_events() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 1.0, 50_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let key = tracked_pool(&service, ORCA, pool, pair).await;
    let mut events = service.subscribe_events();

    source.set(snapshot(ORCA, pool, pair, 1.10, 50_000.0, 500));
    service.data_client(ORCA).unwrap().refresh_pool(&key).await.unwrap();

    let published = drain(&mut events);
    let price = published.iter().find_map(|e| match e {
        MonitorEvent::PriceChange(p) => Some(p.clone()),
        _ => None,
    });
    let price = price.expect("PriceChange");
    assert!((price.price_change_percent - 10.0).abs() < 1e-6);
    assert!(!published.iter().any(|e| matches!(e, MonitorEvent::VolumeChange(_))));
    assert!(published.iter().any(|e| matches!(
        e,
        MonitorEvent::LiquidityChange(l) if l.new_liquidity == Decimal::from(500)
    )));
    assert!(published.iter().any(|e| matches!(
        e,
        MonitorEvent::LiquidityHealth(h) if h.health == LiquidityHealth::Critical && h.pool == key
    )));
}

#[tokio::test]
async fn token_reads_go_through_the_cache() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 2.5, 24_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let client = service.data_client(ORCA).unwrap();

    assert_eq!(client.get_token_price(&pair.0).await.unwrap(), 2.5);
    let calls = source.calls();
    assert_eq!(client.get_token_volume(&pair.1, Timeframe::H1).await.unwrap(), 1_000.0);
    let liquidity = client.get_token_liquidity(&pair.0).await.unwrap();

    assert_eq!(source.calls(), calls);
    assert_eq!(liquidity.liquidity, Decimal::from(100_000));
    assert_eq!(liquidity.health, LiquidityHealth::Healthy);
    assert!(service.store().contains(&PoolKey::new(ORCA, &pool)));

    let metrics = service.metrics().snapshot();
    assert_eq!((metrics.cache_hits, metrics.cache_misses), (2, 1));
    assert!(client.get_token_price(&Pubkey::new_unique()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn read_after_ttl_is_a_miss_and_refetches() {
    let source = MockSource::new(ORCA);
    let (pool, pair) = (Pubkey::new_unique(), mints());
    source.set(snapshot(ORCA, pool, pair, 2.0, 24_000.0, 100_000));
    let service = service_with(&[source.clone()]);
    let client = service.data_client(ORCA).unwrap();
    let ttl = service.store().ttl();

    assert_eq!(client.get_token_price(&pair.0).await.unwrap(), 2.0);
    assert_eq!(client.get_token_price(&pair.0).await.unwrap(), 2.0);
    let (before, calls) = (service.metrics().snapshot(), source.calls());
    assert_eq!((before.cache_hits, before.cache_misses), (1, 1));

    source.set(snapshot(ORCA, pool, pair, 2.5, 24_000.0, 100_000));
    tokio::time::advance(ttl + Duration::from_secs(1)).await;

    assert_eq!(client.get_token_price(&pair.0).await.unwrap(), 2.5);
    let after = service.metrics().snapshot();
    assert_eq!(after.cache_misses, before.cache_misses + 1);
    assert_eq!(after.cache_hits, before.cache_hits);
    assert_eq!(source.calls(), calls + 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_refreshed_then_pruned() {
    let source = MockSource::new(ORCA);
    let (old_pool, new_pool) = (Pubkey::new_unique(), Pubkey::new_unique());
    let (old_pair, new_pair) = (mints(), mints());
    source.set(snapshot(ORCA, old_pool, old_pair, 1.0, 10_000.0, 50_000));
    source.set(snapshot(ORCA, new_pool, new_pair, 1.0, 10_000.0, 50_000));
    let service = service_with(&[source.clone()]);
    let ttl = service.store().ttl();

    let old_key = tracked_pool(&service, ORCA, old_pool, old_pair).await;
    tokio::time::advance(ttl / 2).await;
    let new_key = tracked_pool(&service, ORCA, new_pool, new_pair).await;
    tokio::time::advance(ttl / 2 + Duration::from_secs(1)).await;

    assert!(service.store().get_fresh(&old_key).is_none());
    assert!(service.store().get_fresh(&new_key).is_some());
    let calls = source.calls();
    assert_eq!(service.data_client(ORCA).unwrap().optimize_api_calls().await, 1);
    assert_eq!(source.calls(), calls + 1);

    // Plus rien n'est touché pendant deux TTL : tout part.
    tokio::time::advance(ttl * 2 + Duration::from_secs(1)).await;
    service.store().insert_if_absent(PoolRecord::detected(ORCA, Pubkey::new_unique(), old_pair.0, new_pair.0));
    assert_eq!(service.optimize_storage(), 2);
    assert_eq!(service.store().len(), 1);
}

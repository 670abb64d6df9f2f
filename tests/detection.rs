// DANS : tests/detection.rs

mod common;

use common::{MockChain, drain, orca_program, test_config, wait_for, whirlpool_account};
use pool_monitor::{
    PoolMonitorService,
    config::{DexConfig, ORCA_WHIRLPOOL_PROGRAM_ID},
    events::{MonitorEvent, SystemEventKind},
    rpc::RawNotification,
    state::PoolKey,
};
use solana_sdk::pubkey::Pubkey;

fn orca_dex() -> DexConfig {
    DexConfig::new("orca-whirlpool", ORCA_WHIRLPOOL_PROGRAM_ID, "orca")
}

fn count_new_pools(events: &[MonitorEvent]) -> usize {
    events.iter().filter(|e| matches!(e, MonitorEvent::NewPool(_))).count()
}

#[tokio::test]
async fn startup_scan_detects_existing_pools_and_isolates_a_broken_dex() {
    let chain = MockChain::new();
    let program = orca_program();
    for _ in 0..3 {
        chain.add_account(program, Pubkey::new_unique(), whirlpool_account(&Pubkey::new_unique(), &Pubkey::new_unique()));
    }
    // Compte du programme qui n'est pas un pool (taille inattendue).
    chain.add_account(program, Pubkey::new_unique(), vec![0u8; 120]);

    let config = test_config(vec![orca_dex(), DexConfig::new("broken", "pas-une-pubkey", "none")], None);
    let service = PoolMonitorService::new(config, chain.clone(), Vec::new()).unwrap();
    let mut events = service.subscribe_events();

    let report = service.init().await;

    assert_eq!(report.failed_dexes, vec!["broken".to_string()]);
    assert_eq!(report.subscriptions, 2);
    assert_eq!(report.loaded_pools, 3);
    assert_eq!(service.store().len(), 3);

    let published = drain(&mut events);
    assert_eq!(count_new_pools(&published), 3);
    assert!(published.iter().any(|e| matches!(e, MonitorEvent::Error(err) if err.message.contains("broken"))));
    assert!(published.iter().any(|e| matches!(
        e,
        MonitorEvent::System(system) if system.kind == SystemEventKind::ServiceStarted
    )));

    service.shutdown().await;
    assert!(service.timers().is_empty());
    assert_eq!(chain.unsubscribed().len(), 2);
}

#[tokio::test]
async fn pushed_account_is_detected_once() {
    let chain = MockChain::new();
    let service = PoolMonitorService::new(test_config(vec![orca_dex()], None), chain.clone(), Vec::new()).unwrap();
    let mut events = service.subscribe_events();
    service.init().await;
    drain(&mut events);

    let (pool, mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
    let notification = RawNotification::Account {
        pubkey: Some(pool.to_string()),
        data: Some(whirlpool_account(&mint_a, &mint_b)),
        owner: Some(orca_program().to_string()),
    };
    // Même canal pour les deux abonnements : la notification arrive deux fois.
    assert_eq!(chain.push(&orca_program(), notification.clone()), 2);
    chain.push(&orca_program(), notification);

    let Some(MonitorEvent::NewPool(record)) = wait_for(&mut events, |e| matches!(e, MonitorEvent::NewPool(_))).await else {
        panic!("aucun NewPool reçu");
    };
    assert_eq!(record.address, pool);
    assert_eq!((record.token_a_mint, record.token_b_mint), (mint_a, mint_b));
    assert_eq!(record.dex, "orca-whirlpool");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(count_new_pools(&drain(&mut events)), 0);
    assert_eq!(service.store().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn malformed_and_foreign_notifications_are_dropped() {
    let chain = MockChain::new();
    let service = PoolMonitorService::new(test_config(vec![orca_dex()], None), chain.clone(), Vec::new()).unwrap();
    let mut events = service.subscribe_events();
    service.init().await;
    drain(&mut events);

    chain.push(&orca_program(), RawNotification::Account { pubkey: None, data: Some(vec![1, 2, 3]), owner: None });
    chain.push(&orca_program(), RawNotification::Logs { signature: None, logs: Some(vec!["x".into()]) });
    // Bon layout mais propriétaire étranger.
    chain.push(
        &orca_program(),
        RawNotification::Account {
            pubkey: Some(Pubkey::new_unique().to_string()),
            data: Some(whirlpool_account(&Pubkey::new_unique(), &Pubkey::new_unique())),
            owner: Some(Pubkey::new_unique().to_string()),
        },
    );

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let published = drain(&mut events);
    assert_eq!(count_new_pools(&published), 0);
    assert!(!published.iter().any(|e| matches!(e, MonitorEvent::Error(_))));
    assert!(service.store().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn creation_logs_resolve_the_pool_from_the_transaction() {
    let chain = MockChain::new();
    let (pool, mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
    chain.add_creation_tx("sig-creation", orca_program(), pool, mint_a, mint_b);

    let service = PoolMonitorService::new(test_config(vec![orca_dex()], None), chain.clone(), Vec::new()).unwrap();
    let mut events = service.subscribe_events();
    service.init().await;

    chain.push(
        &orca_program(),
        RawNotification::Logs {
            signature: Some("sig-creation".into()),
            logs: Some(vec!["Program log: Instruction: InitializePool".into()]),
        },
    );
    // Logs sans mot-clé de création : aucune requête de transaction.
    chain.push(
        &orca_program(),
        RawNotification::Logs { signature: Some("sig-swap".into()), logs: Some(vec!["Program log: Instruction: Swap".into()]) },
    );

    let Some(MonitorEvent::NewPool(record)) = wait_for(&mut events, |e| matches!(e, MonitorEvent::NewPool(_))).await else {
        panic!("aucun NewPool reçu");
    };
    assert_eq!(record.key(), PoolKey::new("orca-whirlpool", &pool));
    assert!(record.same_pair(&mint_b, &mint_a));
    assert_eq!(service.store().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn one_failed_channel_keeps_the_dex_subscribed() {
    let chain = MockChain::new();
    chain.fail_logs_subscription(orca_program());
    let service = PoolMonitorService::new(test_config(vec![orca_dex()], None), chain.clone(), Vec::new()).unwrap();
    let mut events = service.subscribe_events();

    let report = service.init().await;

    assert_eq!(report.subscriptions, 1);
    assert!(report.failed_dexes.is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(e, MonitorEvent::Error(err) if err.message.contains("logs"))));
    service.shutdown().await;
}

#[tokio::test]
async fn both_failed_channels_fail_only_that_dex() {
    let chain = MockChain::new();
    chain.fail_logs_subscription(orca_program());
    chain.fail_program_subscription(orca_program());
    chain.add_account(orca_program(), Pubkey::new_unique(), whirlpool_account(&Pubkey::new_unique(), &Pubkey::new_unique()));
    let service = PoolMonitorService::new(test_config(vec![orca_dex()], None), chain.clone(), Vec::new()).unwrap();

    let report = service.init().await;

    assert_eq!(report.subscriptions, 0);
    assert_eq!(report.failed_dexes, vec!["orca-whirlpool".to_string()]);
    // Le balayage complet reste actif comme filet de sécurité.
    assert_eq!(report.loaded_pools, 1);
    assert!(service.timers().active_names().iter().any(|name| name == "full-scan"));
    service.shutdown().await;
}

//! Presence under failure: outages, cut links, late hosts, taken identities.
//! All of these run on paused time so the retry schedule is exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use realmlink_domain::{DisplayName, EntityKind, GridPosition};

use super::*;
use crate::infrastructure::transport::InMemorySignaling;
use crate::runtime::{GuestRuntime, HostRuntime};
use crate::use_cases::{ConnectivityState, HostEdit, SessionContext};

async fn wait_state(
    connectivity: &tokio::sync::watch::Receiver<ConnectivityState>,
    wanted: ConnectivityState,
) {
    let mut connectivity = connectivity.clone();
    tokio::time::timeout(SETTLE, connectivity.wait_for(|state| *state == wanted))
        .await
        .expect("state never reached")
        .unwrap();
}

async fn named_guests(table: &Table) -> Vec<String> {
    table
        .host
        .roster()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|info| info.display_name.map(|n| n.as_str().to_string()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn table_recovers_from_a_signaling_outage() {
    let table = Table::open().await;
    table
        .add_token(EntityKind::Npc, GridPosition::new(2, 2))
        .await;
    let kara = table.seat("Kara").await;
    let before = kara.state().unwrap();

    table.hub.drop_signaling();
    wait_state(&table.host.watch_connectivity(), ConnectivityState::Reconnecting).await;
    wait_state(&kara.watch_connectivity(), ConnectivityState::Reconnecting).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    let during = kara.state().unwrap();
    assert_eq!(during.revision(), before.revision());
    assert_eq!(during.content(), before.content());
    table.hub.restore_signaling();

    wait_connected(&table.host.watch_connectivity()).await;
    wait_connected(&kara.watch_connectivity()).await;
    let after = kara.state().unwrap();
    assert_eq!(after.revision(), before.revision());
    assert_eq!(after.content(), before.content());

    table
        .add_token(EntityKind::Enemy, GridPosition::new(5, 5))
        .await;
    let replica = caught_up(&kara, table.host.state().revision()).await;
    assert_eq!(replica.entity_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn guest_redials_after_its_link_is_cut() {
    let table = Table::open().await;
    let kara = table.seat("Kara").await;
    let guest_peer = table.host.roster().await.unwrap()[0].peer_id.clone();

    let cut_at = Instant::now();
    table.hub.sever(&table_code().host_peer_id(), &guest_peer);
    wait_state(&kara.watch_connectivity(), ConnectivityState::Reconnecting).await;
    wait_connected(&kara.watch_connectivity()).await;
    assert!(cut_at.elapsed() >= Duration::from_secs(5));

    // The guest announces itself again on the new link.
    tokio::time::timeout(SETTLE, async {
        while named_guests(&table).await != vec!["Kara".to_string()] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    table
        .add_token(EntityKind::Npc, GridPosition::new(1, 1))
        .await;
    caught_up(&kara, table.host.state().revision()).await;
}

#[tokio::test(start_paused = true)]
async fn guest_waits_for_a_host_that_starts_late() {
    let hub = InMemorySignaling::new();
    let kara = GuestRuntime::start(
        SessionContext::guest(table_code(), DisplayName::new("Kara").unwrap()),
        deps_for(Arc::new(hub.factory())),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(kara.connectivity(), ConnectivityState::Reconnecting);
    assert!(kara.state().is_none());

    let host = HostRuntime::start(table_code(), deps_for(Arc::new(hub.factory()))).await;
    wait_connected(&kara.watch_connectivity()).await;
    let replica = caught_up(&kara, host.state().revision()).await;
    assert_eq!(replica.content(), host.state().content());
}

#[tokio::test(start_paused = true)]
async fn taken_identity_is_retried_after_the_collision_delay() {
    let hub = InMemorySignaling::new();
    let host_id = table_code().host_peer_id();
    hub.reserve_identity(host_id.clone());

    let started = Instant::now();
    let host = HostRuntime::start(table_code(), deps_for(Arc::new(hub.factory()))).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(host.connectivity(), ConnectivityState::Reconnecting);
    assert!(!hub.is_registered(&host_id));

    hub.release_identity(&host_id);
    wait_connected(&host.watch_connectivity()).await;
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(hub.is_registered(&host_id));
}

#[tokio::test(start_paused = true)]
async fn open_links_get_heartbeats() {
    let table = Table::open().await;
    let _kara = table.seat("Kara").await;
    assert!(table.host.roster().await.unwrap()[0]
        .last_heartbeat_sent_at
        .is_none());

    tokio::time::sleep(Duration::from_secs(16)).await;

    let roster = table.host.roster().await.unwrap();
    assert!(roster[0].last_heartbeat_sent_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn renamed_guest_is_announced_again() {
    let table = Table::open().await;
    let kara = table.seat("Kara").await;

    kara.update_context(SessionContext::guest(
        table_code(),
        DisplayName::new("Kara the Bold").unwrap(),
    ))
    .await
    .unwrap();

    tokio::time::timeout(SETTLE, async {
        while named_guests(&table).await != vec!["Kara the Bold".to_string()] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn guests_follow_a_reloaded_host_to_the_resumed_session() {
    let table = Table::open().await;
    let kara = table.seat("Kara").await;
    table
        .add_token(EntityKind::PlayerSlot, GridPosition::new(2, 2))
        .await;
    let saved = table.host.state();
    caught_up(&kara, saved.revision()).await;

    table.host.shutdown().await.unwrap();
    wait_state(&kara.watch_connectivity(), ConnectivityState::Reconnecting).await;

    let deps = deps_for(Arc::new(table.hub.factory())).with_store(Arc::new(table.saves.clone()));
    let reloaded = HostRuntime::start(table_code(), deps).await;
    assert_eq!(reloaded.state(), saved);

    wait_connected(&kara.watch_connectivity()).await;
    reloaded
        .edit(HostEdit::SetShowEnemyHp(false))
        .await
        .unwrap();
    let replica = caught_up(&kara, reloaded.state().revision()).await;
    assert_eq!(replica.entity_count(), 1);
    assert!(!replica.show_enemy_hp_to_guests());
}

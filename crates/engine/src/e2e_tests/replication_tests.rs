//! Snapshots flow host → guests and every replica converges.

use std::time::Duration;

use realmlink_domain::{EntityKind, GridDimensions, GridPosition, RoomName};
use realmlink_shared::{GuestAction, HpUpdate};

use super::*;
use crate::runtime::SessionEvent;
use crate::use_cases::{Delivery, EditOutcome, GuestIntent, HostEdit};

#[tokio::test(start_paused = true)]
async fn late_guest_receives_the_current_state_on_join() {
    let table = Table::open().await;
    table.add_token(EntityKind::Npc, GridPosition::new(3, 3)).await;
    table.add_token(EntityKind::Enemy, GridPosition::new(9, 9)).await;

    let guest = table.seat("Kara").await;

    let replica = guest.state().unwrap();
    assert_eq!(replica.revision(), table.host.state().revision());
    assert_eq!(replica.content(), table.host.state().content());
    assert_eq!(replica.entity_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn every_guest_converges_on_host_edits() {
    let table = Table::open().await;
    let kara = table.seat("Kara").await;
    let bram = table.seat("Bram").await;

    let outcome = table
        .host
        .edit(HostEdit::AddRoom {
            name: RoomName::new("Crypt").unwrap(),
            grid: GridDimensions::new(8, 10, 50).unwrap(),
        })
        .await
        .unwrap();
    let EditOutcome::RoomAdded(crypt) = outcome else {
        panic!("expected a room, got {:?}", outcome);
    };
    table
        .host
        .edit(HostEdit::SetActiveRoom { room: crypt })
        .await
        .unwrap();
    let revision = table.host.state().revision();

    for guest in [&kara, &bram] {
        let replica = caught_up(guest, revision).await;
        assert_eq!(replica.active_room_id(), crypt);
        assert_eq!(replica.room_count(), 2);
        assert_eq!(replica.content(), table.host.state().content());
    }
}

#[tokio::test(start_paused = true)]
async fn guest_that_misses_an_update_converges_on_the_next() {
    let table = Table::open().await;
    let kara = table.seat("Kara").await;
    let kara_peer = table.host.roster().await.unwrap()[0].peer_id.clone();
    let before = kara.state().unwrap().revision();

    table.hub.lose_frames_to(kara_peer, 1);
    table
        .add_token(EntityKind::Npc, GridPosition::new(1, 1))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(kara.state().unwrap().revision(), before);

    table
        .add_token(EntityKind::Enemy, GridPosition::new(4, 4))
        .await;
    let replica = caught_up(&kara, table.host.state().revision()).await;
    assert_eq!(replica.revision(), table.host.state().revision());
    assert_eq!(replica.content(), table.host.state().content());
    assert_eq!(replica.entity_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn no_op_edits_are_not_rebroadcast() {
    let table = Table::open().await;
    let guest = table.seat("Kara").await;
    let before = table.host.state().revision();
    let mut events = guest.subscribe();

    let status = table.host.state().status();
    table
        .host
        .edit(HostEdit::SetStatus(status))
        .await
        .unwrap();
    assert_eq!(table.host.state().revision(), before);

    table
        .add_token(EntityKind::Npc, GridPosition::new(1, 1))
        .await;
    caught_up(&guest, table.host.state().revision()).await;

    let mut applied = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::StateChanged { .. }) {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
}

#[tokio::test(start_paused = true)]
async fn own_token_moves_reach_other_guests() {
    let table = Table::open().await;
    let slot = table
        .add_token(EntityKind::PlayerSlot, GridPosition::new(2, 2))
        .await;
    let kara = table.seat("Kara").await;
    let bram = table.seat("Bram").await;

    assert_eq!(kara.act(claim(slot, 24, 16)).await.unwrap(), Delivery::Sent);
    let claimed = host_until(&table.host, |s| {
        s.find_entity(slot).is_some_and(|e| e.is_claimed())
    })
    .await;
    caught_up(&kara, claimed.revision()).await;

    let delivery = kara
        .act(GuestIntent::Move {
            id: slot,
            to: GridPosition::new(5, 2),
        })
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let moved = host_until(&table.host, |s| {
        s.find_entity(slot)
            .is_some_and(|e| e.position() == GridPosition::new(5, 2))
    })
    .await;
    let seen_by_bram = caught_up(&bram, moved.revision()).await;
    assert_eq!(
        seen_by_bram.find_entity(slot).unwrap().position(),
        GridPosition::new(5, 2)
    );
}

#[tokio::test(start_paused = true)]
async fn refused_requests_change_nothing_anywhere() {
    let table = Table::open().await;
    let goblin = table
        .add_token(EntityKind::Enemy, GridPosition::new(4, 4))
        .await;
    let kara = table.seat("Kara").await;
    let before = table.host.state();

    let delivery = kara
        .send_action(GuestAction::UpdateHp(HpUpdate { id: goblin, hp: 0 }))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Sent);

    // Anything the host does afterwards is ordered behind the refused request.
    table
        .add_token(EntityKind::Npc, GridPosition::new(0, 0))
        .await;
    let after = caught_up(&kara, table.host.state().revision()).await;

    let goblin_now = after.find_entity(goblin).unwrap();
    assert_eq!(goblin_now.hp, before.find_entity(goblin).unwrap().hp);
    assert_eq!(after.entity_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn guests_see_only_what_the_host_reveals() {
    let table = Table::open().await;
    let goblin = table
        .add_token(EntityKind::Enemy, GridPosition::new(4, 4))
        .await;
    let ambush = table
        .add_token(EntityKind::Enemy, GridPosition::new(6, 6))
        .await;
    table
        .host
        .edit(HostEdit::SetShowEnemyHp(false))
        .await
        .unwrap();
    table
        .host
        .edit(HostEdit::SetVisibility {
            id: ambush,
            visible: false,
        })
        .await
        .unwrap();
    let guest = table.seat("Kara").await;

    let replica = guest.state().unwrap();
    let view = replica.guest_view_of_active_room().unwrap();
    assert_eq!(view.entities.len(), 1);
    assert_eq!(view.entities[0].entity.id, goblin);
    assert_eq!(view.entities[0].visible_hp(), None);

    table
        .host
        .edit(HostEdit::SetShowEnemyHp(true))
        .await
        .unwrap();
    let replica = caught_up(&guest, table.host.state().revision()).await;
    let view = replica.guest_view_of_active_room().unwrap();
    assert!(view.entities[0].visible_hp().is_some());
}

#[tokio::test(start_paused = true)]
async fn host_roster_tracks_named_guests() {
    let table = Table::open().await;
    let _kara = table.seat("Kara").await;
    let bram = table.seat("Bram").await;

    // Join requests may still be queued behind the welcome snapshots.
    let names = tokio::time::timeout(SETTLE, async {
        loop {
            let mut names: Vec<String> = table
                .host
                .roster()
                .await
                .unwrap()
                .iter()
                .filter_map(|info| info.display_name.as_ref().map(|n| n.as_str().to_string()))
                .collect();
            if names.len() == 2 {
                names.sort();
                return names;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(names, vec!["Bram", "Kara"]);

    bram.shutdown().await.unwrap();
    tokio::time::timeout(SETTLE, async {
        while table.host.roster().await.unwrap().len() != 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

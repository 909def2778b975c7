//! Session integration tests
//!
//! Host and follower on a simulated network: 10ms one-way latency, follower
//! clock 50ms ahead of the host.

use crate::helpers::tolerances::*;
use crate::helpers::*;
use approx::assert_abs_diff_eq;
use metrosync::prelude::*;

/// Follower grid equals the host grid moved into the follower's clock.
#[test]
fn test_follower_adopts_host_grid_shifted_by_offset() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.sync_samples(5);

    let sync = rig.host.peer_sync("follower").expect("follower is tracked");
    assert!(sync.is_stable());
    assert_abs_diff_eq!(sync.offset().unwrap(), TEST_FOLLOWER_OFFSET_MS, epsilon = OFFSET_EPSILON_MS);
    assert_abs_diff_eq!(sync.last_rtt().unwrap(), 2.0 * TEST_LATENCY_MS, epsilon = TIME_EPSILON_MS);
    assert_eq!(rig.follower.state(), FollowerState::Syncing);

    rig.host.start_metronome().unwrap();
    let host_anchor = rig.now();

    rig.run_until(100.0, |r| r.follower.pending_start().is_some());
    let (grid, start_at) = rig.follower.pending_start().unwrap();
    assert_eq!(grid.bpm(), 120);
    assert_eq!(grid.anchor_beat_index(), 0);
    assert_abs_diff_eq!(
        grid.anchor_time(),
        host_anchor + TEST_FOLLOWER_OFFSET_MS,
        epsilon = OFFSET_EPSILON_MS
    );
    // Received one latency after the anchor, so the startup floor applies.
    assert_abs_diff_eq!(
        start_at,
        grid.anchor_time() + TEST_LATENCY_MS + 250.0,
        epsilon = OFFSET_EPSILON_MS
    );

    rig.run_for(3000.0);
    assert_eq!(rig.follower.state(), FollowerState::Running);

    let host_ticks = rig.host_ticks();
    let follower_ticks = rig.follower_ticks();
    assert_eq!(host_ticks.first().map(|t| t.beat_index), Some(0));
    // Beat 0 sits inside the startup delay, so the follower comes in on beat 1.
    assert_eq!(follower_ticks.first().map(|t| t.beat_index), Some(1));
    assert_consecutive(&host_ticks);
    assert_consecutive(&follower_ticks);

    for tick in &follower_ticks {
        let host_tick = host_ticks
            .iter()
            .find(|h| h.beat_index == tick.beat_index)
            .expect("host played the same beat");
        assert_eq!(tick.accent, host_tick.accent);
        assert_abs_diff_eq!(
            tick.at - TEST_FOLLOWER_OFFSET_MS,
            host_tick.at,
            epsilon = OFFSET_EPSILON_MS
        );
    }
}

#[test]
fn test_join_handshake_reaches_syncing() {
    let mut rig = Rig::new();
    rig.open_and_join(90);
    assert_eq!(rig.follower.state(), FollowerState::Signaling);

    rig.run_for(2.0 * TEST_LATENCY_MS + 1.0);
    assert_eq!(rig.follower.state(), FollowerState::Syncing);
    assert_eq!(rig.follower.host_id(), Some("host"));
    assert_eq!(rig.follower.epoch(), 1);
    assert_eq!(rig.host.connected_peer_count(), 1);
    // Tempo is known before any start.
    assert_eq!(rig.follower.scheduler().bpm(), 90);

    rig.run_for(2.0 * TEST_LATENCY_MS);
    assert_eq!(rig.follower.offset_updates(), 1);
    assert!(!rig.follower.join_timed_out());
}

/// A follower joining a running room holds the start until its second
/// offset update, then lands on the host's beat numbering.
#[test]
fn test_late_joiner_clicks_on_host_grid() {
    let mut rig = Rig::new();
    let room_id = rig.host.create_room(120, Some("ROOM01")).unwrap();
    rig.host.start_metronome().unwrap();
    rig.run_for(2000.0);

    rig.follower.join_room(&room_id).unwrap();
    rig.run_until(100.0, |r| r.follower.has_held_start());
    assert!(!rig.follower.is_running());
    assert!(rig.follower.pending_start().is_none());

    rig.run_until(3000.0, |r| r.follower.offset_updates() >= 2);
    assert!(!rig.follower.has_held_start());
    assert!(rig.follower.pending_start().is_some());

    rig.run_until(1000.0, |r| r.follower.is_running());
    let joined_at_beat = rig.host.scheduler().current_beat().unwrap();
    rig.run_for(2000.0);

    let host_ticks = rig.host_ticks();
    let follower_ticks = rig.follower_ticks();
    assert!(follower_ticks.len() >= 3);
    assert!(follower_ticks[0].beat_index > joined_at_beat);
    assert_consecutive(&follower_ticks);

    for tick in &follower_ticks {
        let host_tick = host_ticks
            .iter()
            .find(|h| h.beat_index == tick.beat_index)
            .expect("host played the same beat");
        assert_abs_diff_eq!(
            tick.at - TEST_FOLLOWER_OFFSET_MS,
            host_tick.at,
            epsilon = OFFSET_EPSILON_MS
        );
    }
}

#[test]
fn test_stop_silences_follower() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.sync_samples(2);
    rig.host.start_metronome().unwrap();
    rig.run_for(1500.0);
    assert!(rig.follower.is_running());

    rig.host.stop_metronome().unwrap();
    rig.run_for(2.0 * TEST_LATENCY_MS);

    assert!(!rig.follower.is_running());
    assert_eq!(rig.follower.state(), FollowerState::Syncing);
    assert_eq!(rig.follower.scheduler().pending_clicks(), 0);
    assert_eq!(rig.follower.scheduler().pending_visuals(), 0);

    let heard = rig.follower_ticks().len();
    rig.run_for(2000.0);
    assert_eq!(rig.follower_ticks().len(), heard);
}

#[test]
fn test_closing_room_returns_follower_to_idle() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.sync_samples(2);
    rig.host.start_metronome().unwrap();
    rig.run_for(1000.0);

    rig.host.close_room().unwrap();
    rig.run_for(2.0 * TEST_LATENCY_MS);

    assert_eq!(rig.host.state(), HostState::Idle);
    assert_eq!(rig.follower.state(), FollowerState::Idle);
    assert!(rig.follower.room_id().is_none());
    assert_eq!(rig.net.in_flight_count(), 0);
}

#[test]
fn test_follower_leaving_is_removed_from_room() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.run_for(100.0);
    assert_eq!(rig.host.connected_peer_count(), 1);

    rig.follower.leave_room().unwrap();
    rig.run_for(2.0 * TEST_LATENCY_MS);

    assert_eq!(rig.host.connected_peer_count(), 0);
    assert!(rig.host.peer_sync("follower").is_none());
}

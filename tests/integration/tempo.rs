//! Tempo integration tests
//!
//! Tempo changes travel as either a parameter update (stopped) or a new
//! anchor on a future beat boundary (running).

use crate::helpers::tolerances::*;
use crate::helpers::*;
use approx::assert_abs_diff_eq;
use metrosync::beat_interval_ms;
use metrosync::prelude::*;

/// Tempo change mid-playback: both devices switch on the same beat and the
/// beat numbering carries straight through the switch.
#[test]
fn test_running_tempo_change_keeps_beat_sequence() {
    let mut rig = Rig::new();
    rig.open_and_join(100);
    rig.sync_samples(2);

    rig.host.start_metronome().unwrap();
    let host_anchor = rig.now();
    rig.run_until(10_000.0, |r| r.host.scheduler().current_beat() == Some(10));
    assert_abs_diff_eq!(rig.now(), host_anchor + 6000.0, epsilon = TIME_EPSILON_MS);

    rig.host.set_bpm(140).unwrap();
    // now + 300ms lead is beat 10.5, so the switch lands on beat 11.
    let anchor = rig.host.room().and_then(|r| r.anchor()).unwrap();
    assert_eq!(anchor.beat_index, 11);
    assert_abs_diff_eq!(anchor.time_at_host, host_anchor + 6600.0, epsilon = TIME_EPSILON_MS);
    assert_eq!(rig.host.version(), Some(1));

    rig.run_for(4000.0);
    assert_eq!(rig.host.scheduler().bpm(), 140);
    assert_eq!(rig.follower.scheduler().bpm(), 140);

    let host_ticks = rig.host_ticks();
    let follower_ticks = rig.follower_ticks();
    assert_consecutive(&host_ticks);
    assert_consecutive(&follower_ticks);

    let beat_at = |ticks: &[BeatTick], index: i64| {
        ticks
            .iter()
            .find(|t| t.beat_index == index)
            .map(|t| t.at)
            .unwrap_or_else(|| panic!("beat {index} missing from {:?}", indices(ticks)))
    };
    for ticks in [&host_ticks, &follower_ticks] {
        assert_abs_diff_eq!(
            beat_at(ticks, 11) - beat_at(ticks, 10),
            beat_interval_ms(100),
            epsilon = OFFSET_EPSILON_MS
        );
        assert_abs_diff_eq!(
            beat_at(ticks, 12) - beat_at(ticks, 11),
            beat_interval_ms(140),
            epsilon = OFFSET_EPSILON_MS
        );
    }

    for tick in &follower_ticks {
        assert_abs_diff_eq!(
            tick.at - TEST_FOLLOWER_OFFSET_MS,
            beat_at(&host_ticks, tick.beat_index),
            epsilon = OFFSET_EPSILON_MS
        );
    }
}

/// A second change issued before the first lands: the first still takes
/// effect on its beat and the second follows on the pending grid.
#[test]
fn test_back_to_back_tempo_changes_both_take_effect() {
    let mut rig = Rig::new();
    rig.open_and_join(240);
    rig.sync_samples(2);

    rig.host.start_metronome().unwrap();
    let host_anchor = rig.now();
    rig.run_until(10_000.0, |r| r.host.scheduler().current_beat() == Some(10));
    assert_abs_diff_eq!(rig.now(), host_anchor + 2500.0, epsilon = TIME_EPSILON_MS);

    // Lands on beat 12 at +3000.
    rig.host.set_bpm(40).unwrap();
    rig.run_for(250.0);
    // Computed on the pending 40 BPM grid: beat 13 at +4500.
    rig.host.set_bpm(60).unwrap();
    let anchor = rig.host.room().and_then(|r| r.anchor()).unwrap();
    assert_eq!(anchor.beat_index, 13);
    assert_abs_diff_eq!(anchor.time_at_host, host_anchor + 4500.0, epsilon = TIME_EPSILON_MS);
    assert_eq!(rig.host.version(), Some(2));

    rig.run_for(4000.0);
    assert_eq!(rig.host.scheduler().bpm(), 60);
    assert_eq!(rig.follower.scheduler().bpm(), 60);

    let host_ticks = rig.host_ticks();
    let follower_ticks = rig.follower_ticks();
    assert_consecutive(&host_ticks);
    assert_consecutive(&follower_ticks);

    for (index, offset) in [(11, 2750.0), (12, 3000.0), (13, 4500.0), (14, 5500.0)] {
        let tick = host_ticks
            .iter()
            .find(|t| t.beat_index == index)
            .unwrap_or_else(|| panic!("beat {index} missing from {:?}", indices(&host_ticks)));
        assert_abs_diff_eq!(tick.at, host_anchor + offset, epsilon = OFFSET_EPSILON_MS);
    }
    for tick in follower_ticks.iter().filter(|t| t.beat_index >= 11) {
        let host_tick = host_ticks
            .iter()
            .find(|t| t.beat_index == tick.beat_index)
            .unwrap_or_else(|| panic!("host never played beat {}", tick.beat_index));
        assert_abs_diff_eq!(
            tick.at - TEST_FOLLOWER_OFFSET_MS,
            host_tick.at,
            epsilon = OFFSET_EPSILON_MS
        );
    }
}

#[test]
fn test_tempo_change_while_stopped_reaches_follower() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.run_for(100.0);

    rig.host.set_bpm(150).unwrap();
    rig.run_for(2.0 * TEST_LATENCY_MS);
    assert_eq!(rig.follower.scheduler().bpm(), 150);
    assert!(!rig.follower.is_running());

    rig.sync_samples(2);
    rig.host.start_metronome().unwrap();
    rig.run_for(1500.0);

    let (host_ticks, follower_ticks) = (rig.host_ticks(), rig.follower_ticks());
    assert!(follower_ticks.len() >= 2);
    assert_abs_diff_eq!(
        follower_ticks[1].at - follower_ticks[0].at,
        beat_interval_ms(150),
        epsilon = OFFSET_EPSILON_MS
    );
    assert_abs_diff_eq!(
        host_ticks[1].at - host_ticks[0].at,
        beat_interval_ms(150),
        epsilon = TIME_EPSILON_MS
    );
}

#[test]
fn test_rejected_tempo_leaves_session_untouched() {
    let mut rig = Rig::new();
    rig.open_and_join(120);
    rig.run_for(100.0);
    let sent = rig.net.sent_count();

    assert!(rig.host.set_bpm(500).is_err());
    assert!(rig.host.set_bpm(120).is_ok());
    rig.run_for(100.0);

    assert_eq!(rig.host.bpm(), Some(120));
    assert_eq!(rig.host.version(), Some(0));
    assert_eq!(rig.follower.scheduler().bpm(), 120);
    assert_eq!(rig.net.sent_count(), sent);
}

//! # Local Session
//!
//! A host and a follower in one process, connected through a [`LocalBus`].
//! The follower syncs its clock, starts on the host's grid, follows a tempo
//! change mid-playback and stops with the host.
//!
//! **Concepts:** Session builder, async driver, beat listener, tempo change
//!
//! ```bash
//! RUST_LOG=metrosync_session=info cargo run --example local_session
//! ```

use metrosync::driver::{self, DEFAULT_POLL_INTERVAL};
use metrosync::prelude::*;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> metrosync::Result<()> {
    tracing_subscriber::fmt::init();

    let bus = LocalBus::new();

    let mut host = SessionBuilder::new("host").build_host(bus.endpoint())?;
    let room_id = host.create_room(100, None)?;
    println!("Room {room_id} open at 100 BPM");

    let mut follower = SessionBuilder::new("phone").build_follower(bus.endpoint())?;
    follower.scheduler_mut().set_beat_listener(|tick| {
        let mark = if tick.accent { "TICK" } else { "tick" };
        println!("  {mark} #{} at {:.1}ms", tick.beat_index, tick.at);
    });
    follower.join_room(&room_id)?;

    let host = Arc::new(Mutex::new(host));
    let follower = Arc::new(Mutex::new(follower));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drivers = [
        tokio::spawn(driver::run(host.clone(), shutdown_rx.clone(), DEFAULT_POLL_INTERVAL)),
        tokio::spawn(driver::run(follower.clone(), shutdown_rx, DEFAULT_POLL_INTERVAL)),
    ];

    // A couple of ping rounds before starting.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    println!("Offset estimate: {:?}", host.lock().peer_offset("phone"));
    host.lock().start_metronome()?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    println!("Switching to 140 BPM");
    host.lock().set_bpm(140)?;

    tokio::time::sleep(Duration::from_secs(4)).await;
    host.lock().stop_metronome()?;
    println!("Stopped; follower is {:?}", follower.lock().state());

    tokio::time::sleep(Duration::from_millis(200)).await;
    host.lock().close_room()?;
    let _ = shutdown_tx.send(true);
    for handle in drivers {
        let _ = handle.await;
    }

    Ok(())
}

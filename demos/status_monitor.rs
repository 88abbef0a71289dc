use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use treadmill_link::{
    ConnectionConfig, ConnectionManager, ConnectionState, Result, StatusListener, TreadmillStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let Some(address) = std::env::args().nth(1) else {
        eprintln!("usage: status_monitor <XX:XX:XX:XX:XX:XX>");
        std::process::exit(2);
    };

    info!("📊 Treadmill Status Monitor");
    info!("Connecting to {address}...");

    let config = ConnectionConfig {
        reconnect_delay_ms: 500,
        ..ConnectionConfig::default()
    };

    let connect = ConnectionManager::connect_bluetooth(&address, config);
    let treadmill = match tokio::time::timeout(Duration::from_secs(60), connect).await {
        Ok(Ok(treadmill)) => {
            info!("✅ Connected to: {}", treadmill.address());
            treadmill
        }
        Ok(Err(e)) => {
            error!("❌ Failed to connect to device: {e}");
            return Err(e);
        }
        Err(_) => {
            error!("❌ No link-up within 60s");
            return Ok(());
        }
    };

    let (tx, mut statuses) = mpsc::unbounded_channel();
    let listener: StatusListener = Arc::new(move |status: &TreadmillStatus| {
        let _ = tx.send(*status);
    });
    treadmill.add_listener(Arc::clone(&listener)).await;

    let mut states = treadmill.state_changes();
    let mut max_speed = 0.0f32;
    let mut last_workout = None;

    info!("🔍 Monitoring, press Ctrl+C to stop");

    loop {
        tokio::select! {
            Some(status) = statuses.recv() => {
                match status {
                    TreadmillStatus::Disconnected => warn!("❌ Link lost, reconnecting..."),
                    TreadmillStatus::Starting { countdown } => println!("⏱️  Starting in {countdown}..."),
                    _ => println!("{status}"),
                }

                if let Some(workout) = status.workout() {
                    max_speed = max_speed.max(workout.speed.current_kmh);
                    last_workout = Some(*workout);
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                if state == ConnectionState::Connected {
                    info!("✅ Link restored");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("🔌 Disconnecting...");
    treadmill.remove_listener(&listener).await;
    treadmill.destroy().await;

    println!("\n📊 Final Session Summary:");
    if let Some(workout) = last_workout {
        println!("  Last Workout: {workout}");
    }
    println!("  Max Speed: {max_speed:.1} km/h");

    Ok(())
}

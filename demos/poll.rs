//! Poll the tracker at ~90 Hz and print its state.
//!
//! Usage: cargo run --example poll --features lighthouse -- [seconds]
//! Runs for 30 seconds unless a duration is given. Unplugging the tracker
//! or restarting the runtime while this runs exercises reconnection.

use std::time::{Duration, Instant};
use vive_tracker::{Tracker, TrackerStatus};

const FRAME: Duration = Duration::from_micros(11_111);

fn main() {
    env_logger::init();

    let run_for = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<f32>().ok())
        .map(vive_tracker::config::seconds)
        .unwrap_or(Duration::from_secs(30));

    let mut tracker = match Tracker::new() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to create tracker: {}", e);
            std::process::exit(1);
        }
    };

    println!("Backend:      {}", tracker.backend_kind());
    println!("Capabilities: {:?}", tracker.capabilities());
    println!("Config:       {:?}", tracker.config());
    println!();

    if !tracker.setup() {
        println!(
            "No tracker yet, retrying every {:?}...",
            tracker.config().reconnect_interval
        );
    }

    let start = Instant::now();
    let mut frames: u64 = 0;
    let mut tracked: u64 = 0;
    let mut last_status = None;
    let mut last_report = Instant::now();

    while start.elapsed() < run_for {
        let frame_start = Instant::now();
        tracker.update();
        frames += 1;

        let status = tracker.status();
        if last_status != Some(status) {
            let t = start.elapsed().as_secs_f32();
            match tracker.device_name() {
                Some(name) => println!("[{:>7.2}s] {} ({})", t, status, name),
                None => println!("[{:>7.2}s] {}", t, status),
            }
            last_status = Some(status);
        }

        if status == TrackerStatus::Tracking {
            tracked += 1;
            // Print every ~90th frame to avoid flooding the terminal
            if tracked % 90 == 1 {
                let p = tracker.position();
                let [pitch, yaw, roll] = tracker.pose().euler_degrees();
                let v = tracker.velocity();
                let w = tracker.angular_velocity();
                println!(
                    "pos=[{:+.4}, {:+.4}, {:+.4}]  pyr=[{:+7.2}, {:+7.2}, {:+7.2}]  vel=[{:+.3}, {:+.3}, {:+.3}]  ang=[{:+.3}, {:+.3}, {:+.3}]",
                    p.x, p.y, p.z, pitch, yaw, roll, v.x, v.y, v.z, w.x, w.y, w.z,
                );
            }
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            let elapsed = start.elapsed().as_secs_f64();
            println!(
                "--- {} frames in {:.1}s ({:.1} Hz), {} tracked ---",
                frames,
                elapsed,
                frames as f64 / elapsed,
                tracked
            );
            last_report = Instant::now();
        }

        if let Some(rest) = FRAME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    tracker.close();
    let stats = tracker.release_stats();
    println!(
        "\nReleased {} session(s) inline, {} detached",
        stats.inline, stats.detached
    );
    if !tracker.wait_for_releases(Duration::from_secs(5)) {
        eprintln!("Runtime close still pending, exiting anyway");
    }
}

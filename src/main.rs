use std::error::Error;
use std::time::Instant;

use intersection_sim::{BulkTarget, SimConfig, Simulation};

/// The length of a simulated frame in s.
const FRAME_SECS: f64 = 1.0 / 60.0;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SimConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SimConfig::default(),
    };
    let num_frames = match args.next() {
        Some(frames) => frames.parse()?,
        None => 36_000,
    };

    let mut sim = Simulation::new(config);
    sim.bulk_add(BulkTarget::All, 4);

    println!("Simulating {} frames...", num_frames);
    let start = Instant::now();
    for frame in 1..=num_frames {
        sim.step(FRAME_SECS);
        if frame % 3600 == 0 {
            let report = sim.report();
            println!(
                "t = {:>6.1}s | baseline: {:>4} passed, {:>5.2}s avg wait \
                 | adaptive: {:>4} passed, {:>5.2}s avg wait",
                report.elapsed,
                report.baseline.passed,
                report.baseline.average_wait,
                report.adaptive.passed,
                report.adaptive.average_wait,
            );
        }
    }
    println!("Avg. frame: {:?}", start.elapsed() / num_frames.max(1));
    println!("{}", serde_json::to_string_pretty(&sim.report())?);
    Ok(())
}

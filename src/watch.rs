//! Regenerate the database whenever the `.dep` report changes.
//!
//! The toolchain rewrites the report in several quick flushes, so the
//! mtime poll is debounced: every observed change re-arms a settle
//! deadline, and the pipeline runs once the file has stayed quiet for
//! the whole settle window. A transiently malformed or truncated report
//! is reported and the loop keeps watching.

use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use colored::*;
use tokio::time;

use crate::Pipeline;

/// Poll cadence for the report's modification time.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Quiet period a change must survive before the pipeline runs.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Poll-loop state, explicit so one cycle is a pure function of the
/// sampled mtime and the current instant.
struct Watcher {
    last_modified: Option<SystemTime>,
    settle_at: Option<Instant>,
    generations: u64,
    last_generated: Option<Instant>,
}

impl Watcher {
    fn new(last_modified: Option<SystemTime>) -> Self {
        Self {
            last_modified,
            settle_at: None,
            generations: 0,
            last_generated: None,
        }
    }

    /// Feed one mtime sample. Returns true when a change has settled and
    /// the pipeline should run now.
    ///
    /// Re-arming an already armed deadline is the cancel-and-reschedule
    /// step: a burst of writes collapses into one run, timed from the
    /// last write.
    fn observe(&mut self, modified: Option<SystemTime>, now: Instant) -> bool {
        if modified.is_some() && modified != self.last_modified {
            self.last_modified = modified;
            self.settle_at = Some(now + SETTLE_DELAY);
        }
        match self.settle_at {
            Some(deadline) if now >= deadline => {
                self.settle_at = None;
                true
            }
            _ => false,
        }
    }

    fn mark_generated(&mut self, now: Instant) {
        self.generations += 1;
        self.last_generated = Some(now);
    }

    /// Redraw the single status line in place.
    fn draw_status(&self, dep_file: &Path) {
        let last = match self.last_generated {
            Some(at) => format!("{}s ago", at.elapsed().as_secs()),
            None => "never".to_owned(),
        };
        print!(
            "\r{} {} | generations: {} | last: {}   ",
            "watching".cyan(),
            dep_file.display(),
            self.generations,
            last
        );
        let _ = std::io::stdout().flush();
    }
}

/// Watch the report and regenerate on every settled change. Runs one
/// generation up front, then polls until the process is killed.
pub async fn run(pipeline: &Pipeline) {
    let mut watcher = Watcher::new(mtime(&pipeline.dep_file));
    regenerate(pipeline, &mut watcher).await;

    let mut ticks = time::interval(POLL_INTERVAL);
    loop {
        ticks.tick().await;
        if watcher.observe(mtime(&pipeline.dep_file), Instant::now()) {
            regenerate(pipeline, &mut watcher).await;
        }
        watcher.draw_status(&pipeline.dep_file);
    }
}

async fn regenerate(pipeline: &Pipeline, watcher: &mut Watcher) {
    match pipeline.generate().await {
        Ok(outfile) => {
            watcher.mark_generated(Instant::now());
            println!("\r{} {}", "generated".green(), outfile.display());
        }
        Err(e) => eprintln!("\r{} {:#}", "error".red(), e),
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

//! Process supervision: wall-clock and memory enforcement by sampling.
//!
//! Two cooperative tasks watch a started child. The timer task fires once
//! at the wall-clock limit and kills the process tree. The sampler task
//! ticks every few milliseconds, sums the resident memory of the process
//! and its direct children, and kills the tree when the cap is breached.
//! Both share one stats record under a lock and stop promptly when the
//! runner cancels them after a normal exit.

pub mod probe;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, tick, Receiver, Sender};

/// Fallback wall-clock limit when a caller passes zero.
const SAFE_DEFAULT_WALL_LIMIT: Duration = Duration::from_secs(10);
/// How long `stop` waits for the final stats snapshot.
const STATS_COLLECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Resource usage observed for one supervised process tree.
#[derive(Clone, Debug)]
pub struct ProcessStats {
    pub pid: u32,
    /// Peak resident memory in KB; -1 when never sampled.
    pub peak_memory_kb: i64,
    /// The memory cap was breached and the tree was killed.
    pub exceeded_memory: bool,
    /// The wall-clock limit fired and the tree was killed.
    pub timed_out: bool,
    /// Elapsed time when the monitor last observed the process.
    pub duration: Duration,
}

impl ProcessStats {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            peak_memory_kb: -1,
            exceeded_memory: false,
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}

/// Handle to a running monitor. Dropping the handle (or calling `stop`)
/// cancels both tasks.
pub struct MonitorHandle {
    pid: u32,
    started: Instant,
    // Dropped to signal cancellation; both tasks select on the closed end.
    cancel_tx: Option<Sender<()>>,
    stats_rx: Receiver<ProcessStats>,
}

/// Start supervising `pid`.
///
/// `memory_limit_kb <= 0` disables the memory check. A zero wall limit is
/// replaced with a safe default rather than disabling time enforcement.
pub fn spawn(
    pid: u32,
    memory_limit_kb: i64,
    wall_limit: Duration,
    interval: Duration,
) -> MonitorHandle {
    let wall_limit = if wall_limit.is_zero() {
        log::warn!("monitor got zero wall limit for {pid}, using safe default");
        SAFE_DEFAULT_WALL_LIMIT
    } else {
        wall_limit
    };

    let started = Instant::now();
    let stats = Arc::new(Mutex::new(ProcessStats::new(pid)));
    let (cancel_tx, cancel_rx) = bounded::<()>(0);
    let (stats_tx, stats_rx) = bounded::<ProcessStats>(1);

    log::debug!(
        "monitoring process {pid}: memory limit {memory_limit_kb} KB, wall limit {:.2}s",
        wall_limit.as_secs_f64()
    );

    let timer = spawn_timer(pid, wall_limit, started, stats.clone(), cancel_rx.clone());
    let sampler = spawn_sampler(
        pid,
        memory_limit_kb,
        interval,
        started,
        stats.clone(),
        cancel_rx,
    );

    // Collector: once both tasks are done, publish the final snapshot.
    thread::spawn(move || {
        let _ = timer.join();
        let _ = sampler.join();
        let snapshot = stats.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let _ = stats_tx.send(snapshot);
    });

    MonitorHandle {
        pid,
        started,
        cancel_tx: Some(cancel_tx),
        stats_rx,
    }
}

fn spawn_timer(
    pid: u32,
    wall_limit: Duration,
    started: Instant,
    stats: Arc<Mutex<ProcessStats>>,
    cancel_rx: Receiver<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        select! {
            recv(cancel_rx) -> _ => {}
            recv(after(wall_limit)) -> _ => {
                let elapsed = started.elapsed();
                {
                    let mut s = stats.lock().unwrap_or_else(|e| e.into_inner());
                    s.timed_out = true;
                    s.duration = elapsed;
                }
                log::info!(
                    "process {pid} timed out after {:.2}s (limit {:.2}s)",
                    elapsed.as_secs_f64(),
                    wall_limit.as_secs_f64()
                );
                probe::kill_tree(pid);
            }
        }
    })
}

fn spawn_sampler(
    pid: u32,
    memory_limit_kb: i64,
    interval: Duration,
    started: Instant,
    stats: Arc<Mutex<ProcessStats>>,
    cancel_rx: Receiver<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let ticker = tick(interval);
        loop {
            select! {
                recv(cancel_rx) -> _ => {
                    let mut s = stats.lock().unwrap_or_else(|e| e.into_inner());
                    s.duration = started.elapsed();
                    return;
                }
                recv(ticker) -> _ => {
                    let mut s = stats.lock().unwrap_or_else(|e| e.into_inner());
                    if s.timed_out {
                        return;
                    }
                    if !probe::is_alive(pid) {
                        s.duration = started.elapsed();
                        return;
                    }
                    s.duration = started.elapsed();

                    if let Ok(kb) = probe::tree_rss_kb(pid) {
                        if kb > s.peak_memory_kb {
                            s.peak_memory_kb = kb;
                        }
                    }

                    if memory_limit_kb > 0 && s.peak_memory_kb > memory_limit_kb {
                        log::info!(
                            "process {pid} exceeded memory: {} KB > {memory_limit_kb} KB",
                            s.peak_memory_kb
                        );
                        s.exceeded_memory = true;
                        drop(s);
                        probe::kill_tree(pid);
                        return;
                    }
                }
            }
        }
    })
}

impl MonitorHandle {
    /// Cancel both tasks and collect the final stats. Waits briefly for the
    /// snapshot; if the tasks do not settle in time, fabricates a minimal
    /// record carrying only the observed duration.
    pub fn stop(mut self) -> ProcessStats {
        drop(self.cancel_tx.take());
        match self.stats_rx.recv_timeout(STATS_COLLECT_TIMEOUT) {
            Ok(stats) => stats,
            Err(_) => {
                log::warn!("monitor for {} did not report in time", self.pid);
                ProcessStats {
                    pid: self.pid,
                    peak_memory_kb: -1,
                    exceeded_memory: false,
                    timed_out: false,
                    duration: self.started.elapsed(),
                }
            }
        }
    }
}

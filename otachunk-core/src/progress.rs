use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic progress reporting for long encodes/decodes, emitted as `tracing` events.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    stage: Arc<Mutex<String>>,
    chunks_done: Arc<AtomicU64>,
    chunks_total: Arc<AtomicU64>,
    bytes_done: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            chunks_done: Arc::new(AtomicU64::new(0)),
            chunks_total: Arc::new(AtomicU64::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn set_stage(&self, s: &str) {
        if !self.enabled {
            return;
        }
        if let Ok(mut g) = self.stage.lock() {
            *g = s.to_string();
        }
        // Counters are per stage; every stage walks the same chunks.
        self.chunks_done.store(0, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn set_chunks_total(&self, n: u64) {
        self.chunks_total.store(n, Ordering::Relaxed);
    }

    pub fn inc_chunk(&self, bytes: u64) {
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(REPORT_INTERVAL);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let stage = this.stage.lock().map(|g| g.clone()).unwrap_or_default();
                let done = this.chunks_done.load(Ordering::Relaxed);
                let total = this.chunks_total.load(Ordering::Relaxed);
                let pct = if total > 0 { done * 100 / total } else { 0 };
                info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    stage = %stage,
                    chunks = done,
                    total,
                    bytes = this.bytes_done.load(Ordering::Relaxed),
                    "progress {}%",
                    pct
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::file_digests_counted;

    #[test]
    fn hashing_stage_counts_every_file() {
        let td = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..3)
            .map(|i| {
                let p = td.path().join(format!("img.{i:04}"));
                std::fs::write(&p, vec![i as u8; 10 + i]).unwrap();
                p
            })
            .collect();
        let prog = Progress::new(true);
        prog.set_stage("Splitting");
        prog.inc_chunk(99);
        prog.set_stage("Hashing");
        file_digests_counted(&paths, &prog).unwrap();
        assert_eq!(prog.chunks_done.load(Ordering::Relaxed), 3);
        assert_eq!(prog.bytes_done.load(Ordering::Relaxed), 33);
    }
}

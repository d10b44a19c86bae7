//! Per-path run slots.
//!
//! Every event reserves a slot for each path it touches at dispatch time,
//! synchronously and in arrival order. A reservation becomes runnable once
//! every earlier reservation for the same paths has been released, so runs
//! for one path start in arrival order and never overlap while runs for
//! different paths proceed independently.
//!
//! Each reservation forms a ticket in a per-path chain: the slot table keeps
//! the most recent ticket's completion signal, and the next reservation for
//! that path waits on it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

struct Tail {
    ticket: u64,
    done: watch::Receiver<bool>,
}

type Table = Arc<Mutex<HashMap<PathBuf, Tail>>>;

#[derive(Default)]
pub struct RunSlots {
    table: Table,
    next_ticket: AtomicU64,
}

/// Releases the ticket on drop, whether or not it was ever acquired.
struct Release {
    table: Table,
    keys: Vec<PathBuf>,
    ticket: u64,
    done: watch::Sender<bool>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let _ = self.done.send(true);
        if let Ok(mut table) = self.table.lock() {
            for key in &self.keys {
                if table.get(key).map(|t| t.ticket) == Some(self.ticket) {
                    table.remove(key);
                }
            }
        }
    }
}

/// A place in line for one or more paths.
pub struct Reservation {
    release: Release,
    predecessors: Vec<watch::Receiver<bool>>,
}

/// Exclusive hold on the reserved paths until dropped.
pub struct SlotGuard {
    _release: Release,
}

impl RunSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behind every outstanding reservation for `keys`.
    pub fn reserve(&self, keys: &[PathBuf]) -> Reservation {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = watch::channel(false);

        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut predecessors = Vec::new();
        // A poisoned table only means a panic elsewhere; the map is still usable.
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for key in &keys {
            let previous = table.insert(
                key.clone(),
                Tail {
                    ticket,
                    done: rx.clone(),
                },
            );
            if let Some(prev) = previous {
                predecessors.push(prev.done);
            }
        }
        drop(table);

        Reservation {
            release: Release {
                table: Arc::clone(&self.table),
                keys,
                ticket,
                done,
            },
            predecessors,
        }
    }

    /// Number of paths with an outstanding reservation.
    pub fn pending_paths(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl Reservation {
    /// Wait until every earlier reservation for these paths is released.
    pub async fn acquire(self) -> SlotGuard {
        let Reservation {
            release,
            predecessors,
        } = self;
        for mut prev in predecessors {
            // A dropped sender also means the predecessor is gone.
            let _ = prev.wait_for(|done| *done).await;
        }
        SlotGuard { _release: release }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(p: &str) -> Vec<PathBuf> {
        vec![PathBuf::from(p)]
    }

    #[tokio::test]
    async fn same_path_runs_in_reservation_order() {
        let slots = RunSlots::new();
        let first = slots.reserve(&key("/r/a"));
        let second = slots.reserve(&key("/r/a"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let log2 = Arc::clone(&log);
        let late = tokio::spawn(async move {
            let _guard = second.acquire().await;
            log2.lock().unwrap().push("second");
        });

        let guard = first.acquire().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        log.lock().unwrap().push("first");
        drop(guard);

        late.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(slots.pending_paths(), 0);
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let slots = RunSlots::new();
        let _a = slots.reserve(&key("/r/a")).acquire().await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            slots.reserve(&key("/r/b")).acquire(),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn move_waits_for_both_paths() {
        let slots = RunSlots::new();
        let hold_dst = slots.reserve(&key("/r/dst")).acquire().await;
        let moved = slots.reserve(&[PathBuf::from("/r/dst"), PathBuf::from("/r/src")]);

        let blocked = tokio::time::timeout(Duration::from_millis(50), moved.acquire()).await;
        assert!(blocked.is_err());
        drop(hold_dst);
    }

    #[tokio::test]
    async fn dropped_reservation_releases_followers() {
        let slots = RunSlots::new();
        let abandoned = slots.reserve(&key("/r/a"));
        let follower = slots.reserve(&key("/r/a"));
        drop(abandoned);
        let acquired = tokio::time::timeout(Duration::from_millis(100), follower.acquire()).await;
        assert!(acquired.is_ok());
    }
}

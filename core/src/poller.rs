// -----------------------------------------------------------------------------
// Rust SECoP playground
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// -----------------------------------------------------------------------------
//
//! Pollers drive periodic parameter reads.
//!
//! `Instance::run` already implements the Basic poller (one ticker per
//! module thread) directly, which is what every module in this crate
//! uses by default. The `GenericPoller` here is the shared, single-
//! thread scheduler variant for servers with many low-duty-cycle
//! modules that would otherwise waste a thread each; a module opts in
//! with the `pollerkind = "generic"` config property, which makes
//! `secop_modules::run_module` register the instance with [`generic`]
//! instead of relying on its own `Instance::run` ticker.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::Mutex;

/// Type-erased handle to anything that can be polled once.
pub trait Polled: Send + Sync {
    fn poll_once(&self);
    fn name(&self) -> &str;
}

struct Entry {
    deadline: Instant,
    period: Duration,
    target: Arc<dyn Polled>,
}

// BinaryHeap is a max-heap; wrap in Reverse via a manual Ord on deadline.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool { self.deadline == other.deadline }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.deadline.cmp(&other.deadline) }
}

/// A shared scheduler thread polling many targets at independent rates
/// from one priority queue of `(next_deadline, target)` entries.
pub struct GenericPoller {
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
}

impl GenericPoller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(BinaryHeap::new()) })
    }

    pub fn register(&self, target: Arc<dyn Polled>, period: Duration) {
        self.queue.lock().push(Reverse(Entry {
            deadline: Instant::now() + period,
            period,
            target,
        }));
    }

    /// Run forever on the calling thread, sleeping until the next
    /// deadline and then polling exactly the targets that are due.
    pub fn run(self: Arc<Self>) {
        loop {
            let next = {
                let queue = self.queue.lock();
                queue.peek().map(|Reverse(e)| e.deadline)
            };
            match next {
                None => { thread::sleep(Duration::from_millis(200)); }
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep((deadline - now).min(Duration::from_millis(500)));
                        continue;
                    }
                    let mut queue = self.queue.lock();
                    if let Some(Reverse(mut entry)) = queue.pop() {
                        drop(queue);
                        entry.target.poll_once();
                        entry.deadline = Instant::now() + entry.period;
                        self.queue.lock().push(Reverse(entry));
                    }
                }
            }
        }
    }

    /// Spawn `run` on a dedicated thread, named for the log prefix.
    pub fn spawn(self: Arc<Self>) {
        thread::Builder::new()
            .name("generic-poller".into())
            .spawn(move || self.run())
            .expect("could not start generic poller thread");
    }
}

impl Default for GenericPoller {
    fn default() -> Self { Self { queue: Mutex::new(BinaryHeap::new()) } }
}

lazy_static! {
    /// The process-wide Generic poller, shared by every module instance
    /// that opts in via `pollerkind = "generic"`.
    static ref GENERIC: Arc<GenericPoller> = GenericPoller::new();
}

static GENERIC_SPAWNED: Once = Once::new();

/// Returns the shared Generic poller, spawning its scheduler thread the
/// first time any module opts into it.
pub fn generic() -> Arc<GenericPoller> {
    GENERIC_SPAWNED.call_once(|| GENERIC.clone().spawn());
    GENERIC.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);
    impl Polled for Counter {
        fn poll_once(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
        fn name(&self) -> &str { "counter" }
    }

    #[test]
    fn registered_targets_get_polled_in_deadline_order() {
        let poller = GenericPoller::new();
        let fast = Arc::new(Counter(AtomicUsize::new(0)));
        let slow = Arc::new(Counter(AtomicUsize::new(0)));
        poller.register(fast.clone(), Duration::from_millis(5));
        poller.register(slow.clone(), Duration::from_secs(60));

        // Drive the queue manually for a few iterations instead of
        // spawning a thread, to keep the test deterministic.
        for _ in 0..3 {
            let mut queue = poller.queue.lock();
            if let Some(Reverse(mut entry)) = queue.pop() {
                drop(queue);
                thread::sleep(Duration::from_millis(6));
                entry.target.poll_once();
                entry.deadline = Instant::now() + entry.period;
                poller.queue.lock().push(Reverse(entry));
            }
        }
        assert!(fast.0.load(Ordering::SeqCst) >= 2);
        assert_eq!(slow.0.load(Ordering::SeqCst), 0);
    }
}

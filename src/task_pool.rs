//! Cooperative task pool (spec §4.8): single-shot and recurring tasks with
//! steady-clock deadlines, executed from one worker loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Compile-time task capacity.
pub const TASK_CAPACITY: usize = 32;

/// Abstracts the steady clock the pool schedules against, so tests can drive
/// deadlines deterministically instead of sleeping on a real clock (the fake
/// mirrors the `sys_get_timer`/`sys_set_timer` stand-ins `multitimer` uses,
/// adapted to an owned value since each test wants its own clock rather than
/// one process-wide `thread_local!`).
pub trait SteadyClock: Send + Sync {
    /// Seconds since an arbitrary but fixed epoch.
    fn now_secs(&self) -> f64;
}

/// [`SteadyClock`] backed by [`std::time::Instant`].
pub struct SystemClock {
    epoch: std::time::Instant,
}

impl SystemClock {
    /// Creates a clock whose epoch is "now".
    pub fn new() -> Self {
        SystemClock {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl SteadyClock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// A clock whose time is set explicitly, for deterministic tests.
pub struct FakeClock(AtomicU64);

impl FakeClock {
    /// Creates a fake clock starting at `now_secs`.
    pub fn new(now_secs: f64) -> Self {
        FakeClock(AtomicU64::new(now_secs.to_bits()))
    }

    /// Advances (or rewinds) the fake clock to `now_secs`.
    pub fn set(&self, now_secs: f64) {
        self.0.store(now_secs.to_bits(), Ordering::SeqCst);
    }
}

impl SteadyClock for FakeClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

struct TaskSlot {
    single_shot: bool,
    interval_secs: f64,
    description: String,
    last_executed: Option<f64>,
    removed: bool,
    func: Box<dyn FnMut() + Send>,
}

struct Inner {
    slots: Vec<Option<TaskSlot>>,
}

impl Inner {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(TASK_CAPACITY);
        slots.resize_with(TASK_CAPACITY, || None);
        Inner { slots }
    }
}

/// The pool itself: a fixed-capacity table of tasks, shared between the
/// worker loop and every [`TaskTracker`] a `post_task` call handed out.
pub struct TaskPool {
    inner: Arc<Mutex<Inner>>,
}

impl TaskPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        TaskPool {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Posts a task. `interval_secs` is the minimum re-fire spacing for a
    /// recurring task, or the one-shot delay for `single_shot`. Returns an
    /// RAII [`TaskTracker`]; dropping it cancels the task cooperatively —
    /// the pool just skips a slot it finds `removed`.
    pub fn post_task(
        &self,
        description: impl Into<String>,
        single_shot: bool,
        interval_secs: f64,
        func: impl FnMut() + Send + 'static,
    ) -> Option<TaskTracker> {
        let mut guard = self.inner.lock().unwrap();
        let index = guard.slots.iter().position(|s| s.is_none())?;
        guard.slots[index] = Some(TaskSlot {
            single_shot,
            interval_secs,
            description: description.into(),
            last_executed: None,
            removed: false,
            func: Box::new(func),
        });
        drop(guard);
        Some(TaskTracker {
            index,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Scans every live task, running any whose `last_executed + interval`
    /// has elapsed as of `now_secs`. Single-shot tasks are removed after
    /// firing. Returns the earliest deadline among tasks still pending, for
    /// the worker loop to sleep until.
    pub fn do_work_once(&self, now_secs: f64) -> Option<f64> {
        let mut guard = self.inner.lock().unwrap();
        let mut earliest: Option<f64> = None;
        let mut to_clear = Vec::new();

        for (index, slot) in guard.slots.iter_mut().enumerate() {
            let Some(task) = slot else { continue };
            if task.removed {
                to_clear.push(index);
                continue;
            }
            let deadline = task.last_executed.map_or(0.0, |t| t + task.interval_secs);
            if deadline <= now_secs {
                (task.func)();
                task.last_executed = Some(now_secs);
                if task.single_shot {
                    to_clear.push(index);
                    continue;
                }
            }
            let next = task.last_executed.unwrap_or(now_secs) + task.interval_secs;
            earliest = Some(earliest.map_or(next, |e: f64| e.min(next)));
        }

        for index in to_clear {
            guard.slots[index] = None;
        }
        earliest
    }

    /// Number of tasks currently posted (including ones pending cancellation
    /// the next `do_work_once` hasn't reaped yet).
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// `true` when no tasks are posted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the worker loop until `stop` is set, sleeping on real wall-clock
    /// time between ticks. Not used by tests (which drive `do_work_once`
    /// directly against a [`FakeClock`]); this is boot-time wiring (spec
    /// §4.10 step 5).
    pub fn run_blocking(
        &self,
        clock: Arc<dyn SteadyClock>,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) {
        while !stop.load(Ordering::Acquire) {
            let next = self.do_work_once(clock.now_secs());
            let sleep_secs = next.map(|d| (d - clock.now_secs()).max(0.0)).unwrap_or(1.0);
            std::thread::sleep(std::time::Duration::from_secs_f64(sleep_secs.min(5.0)));
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        TaskPool::new()
    }
}

/// RAII handle returned by [`TaskPool::post_task`]. Dropping it cancels the
/// task: the pool observes a `removed` sentinel in the slot on its next
/// `do_work_once` pass and reclaims it, rather than this drop reaching
/// across threads into the slot directly.
pub struct TaskTracker {
    index: usize,
    pool: Weak<Mutex<Inner>>,
}

impl TaskTracker {
    /// The task's human-readable description, for diagnostics.
    pub fn description(&self) -> Option<String> {
        let pool = self.pool.upgrade()?;
        let guard = pool.lock().unwrap();
        guard.slots[self.index].as_ref().map(|t| t.description.clone())
    }
}

impl Drop for TaskTracker {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut guard = pool.lock().unwrap();
            if let Some(task) = guard.slots[self.index].as_mut() {
                task.removed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn recurring_task_fires_at_most_once_per_interval() {
        let pool = TaskPool::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = fires.clone();
        let _tracker = pool
            .post_task("tick", false, 10.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        pool.do_work_once(0.0);
        pool.do_work_once(5.0);
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        pool.do_work_once(10.0);
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn single_shot_task_fires_exactly_once() {
        let pool = TaskPool::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = fires.clone();
        let _tracker = pool
            .post_task("once", true, 0.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        pool.do_work_once(0.0);
        pool.do_work_once(1.0);
        pool.do_work_once(2.0);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn dropping_tracker_cancels_the_task() {
        let pool = TaskPool::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = fires.clone();
        let tracker = pool
            .post_task("cancel-me", false, 1.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        drop(tracker);
        pool.do_work_once(0.0);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn do_work_once_returns_earliest_deadline() {
        let pool = TaskPool::new();
        let _a = pool.post_task("a", false, 10.0, || {}).unwrap();
        let _b = pool.post_task("b", false, 3.0, || {}).unwrap();

        let next = pool.do_work_once(0.0).unwrap();
        assert_eq!(next, 3.0);
    }

    #[test]
    fn fake_clock_reports_the_set_value() {
        let clock = FakeClock::new(5.0);
        assert_eq!(clock.now_secs(), 5.0);
        clock.set(42.0);
        assert_eq!(clock.now_secs(), 42.0);
    }
}

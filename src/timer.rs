//! Single-shot timers keyed by token
//!
//! Each engine owns one [`TimerService`]. A token names the callback that a
//! timer stands for; at most one timer per token is armed, and arming a
//! token cancels whatever was armed for it before. Expiries are not run as
//! callbacks on another thread. They come back to the owner as tokens, and
//! the owner dispatches them in its own serialization domain.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identifies what an expiring timer should trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerToken {
    /// Re-check the EVSE charging/discharging enable windows
    EnableWindowCheck,
    /// Refresh the valve remaining duration or auto-close it
    ValveRemainingDuration,
}

/// Arms and cancels single-shot timers
pub trait TimerService: Send {
    /// Arm `token` to expire after `delay`, replacing any armed timer for it
    fn arm(&mut self, token: TimerToken, delay: Duration);

    /// Cancel the timer for `token`, if any
    fn cancel(&mut self, token: TimerToken);

    /// Whether a timer for `token` is pending
    fn is_armed(&self, token: TimerToken) -> bool;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Generation of the currently armed timer per token
type ArmedGenerations = Arc<Mutex<HashMap<TimerToken, u64>>>;

/// Timer service backed by tokio tasks.
///
/// Must be used from within a tokio runtime.
pub struct TokioTimerService {
    tx: mpsc::UnboundedSender<(TimerToken, u64)>,
    armed: ArmedGenerations,
    tasks: HashMap<TimerToken, JoinHandle<()>>,
    next_generation: AtomicU64,
}

/// Receiving side of a [`TokioTimerService`]
pub struct TimerReceiver {
    rx: mpsc::UnboundedReceiver<(TimerToken, u64)>,
    armed: ArmedGenerations,
}

impl TokioTimerService {
    pub fn new() -> (Self, TimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let armed: ArmedGenerations = Arc::new(Mutex::new(HashMap::new()));
        (
            Self {
                tx,
                armed: armed.clone(),
                tasks: HashMap::new(),
                next_generation: AtomicU64::new(1),
            },
            TimerReceiver { rx, armed },
        )
    }
}

impl TimerService for TokioTimerService {
    fn arm(&mut self, token: TimerToken, delay: Duration) {
        self.cancel(token);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.armed).insert(token, generation);

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((token, generation));
        });
        self.tasks.insert(token, handle);
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(handle) = self.tasks.remove(&token) {
            handle.abort();
        }
        lock(&self.armed).remove(&token);
    }

    fn is_armed(&self, token: TimerToken) -> bool {
        lock(&self.armed).contains_key(&token)
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl TimerReceiver {
    /// Next live expiry. Expiries of timers that were cancelled or re-armed
    /// after they fired are dropped here.
    pub async fn recv(&mut self) -> Option<TimerToken> {
        loop {
            let (token, generation) = self.rx.recv().await?;
            let mut armed = lock(&self.armed);
            if armed.get(&token) == Some(&generation) {
                armed.remove(&token);
                return Some(token);
            }
        }
    }
}

/// Timer service that only records what is armed.
///
/// Clones share state: a test keeps one handle, hands another to the engine,
/// and fires expiries by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualTimerService {
    inner: Arc<Mutex<ManualTimers>>,
}

#[derive(Debug, Default)]
struct ManualTimers {
    armed: BTreeMap<TimerToken, Duration>,
    arm_count: usize,
}

impl ManualTimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the token was last armed with, if still pending
    pub fn armed_delay(&self, token: TimerToken) -> Option<Duration> {
        lock(&self.inner).armed.get(&token).copied()
    }

    /// Total number of `arm` calls so far
    pub fn arm_count(&self) -> usize {
        lock(&self.inner).arm_count
    }

    /// Consume the pending timer for `token`; true if one was armed.
    /// The caller then delivers the expiry to the engine.
    pub fn fire(&self, token: TimerToken) -> bool {
        lock(&self.inner).armed.remove(&token).is_some()
    }
}

impl TimerService for ManualTimerService {
    fn arm(&mut self, token: TimerToken, delay: Duration) {
        let mut timers = lock(&self.inner);
        timers.armed.insert(token, delay);
        timers.arm_count += 1;
    }

    fn cancel(&mut self, token: TimerToken) {
        lock(&self.inner).armed.remove(&token);
    }

    fn is_armed(&self, token: TimerToken) -> bool {
        lock(&self.inner).armed.contains_key(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_timer_rearm_replaces_delay() {
        let handle = ManualTimerService::new();
        let mut timers = handle.clone();
        timers.arm(TimerToken::EnableWindowCheck, Duration::from_secs(5));
        timers.arm(TimerToken::EnableWindowCheck, Duration::from_secs(30));

        assert_eq!(
            handle.armed_delay(TimerToken::EnableWindowCheck),
            Some(Duration::from_secs(30))
        );
        assert_eq!(handle.arm_count(), 2);
        assert!(handle.fire(TimerToken::EnableWindowCheck));
        assert!(!handle.fire(TimerToken::EnableWindowCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_delivers_token() {
        let (mut timers, mut rx) = TokioTimerService::new();
        timers.arm(TimerToken::EnableWindowCheck, Duration::from_secs(5));
        assert!(timers.is_armed(TimerToken::EnableWindowCheck));

        let token = rx.recv().await;
        assert_eq!(token, Some(TimerToken::EnableWindowCheck));
        assert!(!timers.is_armed(TimerToken::EnableWindowCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn rearmed_timer_fires_once_with_latest_delay() {
        let (mut timers, mut rx) = TokioTimerService::new();
        timers.arm(TimerToken::ValveRemainingDuration, Duration::from_secs(1));
        timers.arm(TimerToken::ValveRemainingDuration, Duration::from_secs(10));

        let start = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(TimerToken::ValveRemainingDuration));
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut timers, mut rx) = TokioTimerService::new();
        timers.arm(TimerToken::EnableWindowCheck, Duration::from_secs(1));
        timers.cancel(TimerToken::EnableWindowCheck);
        timers.arm(TimerToken::ValveRemainingDuration, Duration::from_secs(2));

        assert_eq!(rx.recv().await, Some(TimerToken::ValveRemainingDuration));
    }
}

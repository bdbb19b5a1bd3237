//! Background pollers caching collaborator snapshots.
//!
//! Each poller owns a fetch function and keeps its latest successful result in a
//! [`watch`] channel. A poller can be paused (its background task then skips ticks) and
//! refreshed on demand regardless of the pause state. A background fetch that was
//! already in flight when the poller got paused or refreshed is discarded.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::snapshot::{BalanceSnapshot, ServiceSnapshot, StakingSnapshot};

type FetchFn<T> = dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync;

struct PollerInner<T> {
    name: &'static str,
    fetch: Box<FetchFn<T>>,
    latest: watch::Sender<Option<T>>,
    paused: AtomicBool,
    /// Bumped on every pause and explicit refresh.
    epoch: AtomicU64,
}

/// A pausable, refreshable cache of one collaborator snapshot.
pub struct Poller<T> {
    inner: Arc<PollerInner<T>>,
}

impl<T> Clone for Poller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a poller around a fetch function. Nothing is fetched until
    /// [`refresh`](Self::refresh) or [`spawn`](Self::spawn) is called.
    pub fn new<F>(name: &'static str, fetch: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(PollerInner {
                name,
                fetch: Box::new(fetch),
                latest,
                paused: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// The latest fetched value, `None` while nothing has been fetched.
    pub fn latest(&self) -> Option<T> {
        self.inner.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.inner.latest.subscribe()
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(poller = self.inner.name, "Polling paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        tracing::debug!(poller = self.inner.name, "Polling resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Fetch now and store the result. The previous value is kept on failure.
    pub async fn refresh(&self) -> Result<()> {
        let value = (self.inner.fetch)().await?;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.latest.send_replace(Some(value));
        Ok(())
    }

    /// One background fetch. The result is dropped if the poller was paused or
    /// refreshed while the fetch was in flight.
    async fn poll_once(&self) -> Result<()> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let value = (self.inner.fetch)().await?;
        self.inner.latest.send_if_modified(|latest| {
            if self.is_paused() || self.inner.epoch.load(Ordering::SeqCst) != epoch {
                tracing::trace!(poller = self.inner.name, "Discarding stale poll result");
                return false;
            }
            *latest = Some(value);
            true
        });
        Ok(())
    }

    /// Poll in the background every `period`, skipping ticks while paused.
    pub fn spawn(&self, period: Duration) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if poller.is_paused() {
                    tracing::trace!(poller = poller.name(), "Skipping paused poll");
                    continue;
                }
                if let Err(e) = poller.poll_once().await {
                    tracing::warn!(poller = poller.name(), error = %e, "Polling failed");
                }
            }
        })
    }
}

/// The three independent pollers an orchestrator pauses around a run.
#[derive(Clone)]
pub struct Pollers {
    pub services: Poller<ServiceSnapshot>,
    pub balances: Poller<BalanceSnapshot>,
    pub staking: Poller<StakingSnapshot>,
}

impl Pollers {
    /// Pause all three pollers until the returned guard is dropped.
    pub fn pause_all(&self) -> PollingPause<'_> {
        self.services.pause();
        self.balances.pause();
        self.staking.pause();
        PollingPause { pollers: self }
    }

    pub fn all_paused(&self) -> bool {
        self.services.is_paused() && self.balances.is_paused() && self.staking.is_paused()
    }

    pub fn any_paused(&self) -> bool {
        self.services.is_paused() || self.balances.is_paused() || self.staking.is_paused()
    }

    /// Fetch every snapshot once, in the same order as a post-start resync.
    pub async fn refresh_all(&self) -> Result<()> {
        self.services.refresh().await?;
        self.staking.refresh().await?;
        self.balances.refresh().await?;
        Ok(())
    }

    /// Start the three background polling tasks.
    pub fn spawn_all(&self, period: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.services.spawn(period),
            self.balances.spawn(period),
            self.staking.spawn(period),
        ]
    }
}

/// Keeps all pollers paused; resumes them when dropped.
#[must_use = "pollers resume as soon as the guard is dropped"]
pub struct PollingPause<'a> {
    pollers: &'a Pollers,
}

impl Drop for PollingPause<'_> {
    fn drop(&mut self) {
        self.pollers.services.resume();
        self.pollers.balances.resume();
        self.pollers.staking.resume();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;

    fn counting_poller(counter: Arc<AtomicUsize>) -> Poller<usize> {
        Poller::new("counter", move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
        })
    }

    fn pollers() -> Pollers {
        Pollers {
            services: Poller::new("services", || async { Ok(ServiceSnapshot::default()) }.boxed()),
            balances: Poller::new("balances", || async { Ok(BalanceSnapshot::default()) }.boxed()),
            staking: Poller::new("staking", || async { Ok(StakingSnapshot::default()) }.boxed()),
        }
    }

    #[tokio::test]
    async fn test_refresh_stores_latest() {
        let poller = counting_poller(Arc::new(AtomicUsize::new(0)));
        assert_eq!(poller.latest(), None);

        poller.refresh().await.unwrap();
        assert_eq!(poller.latest(), Some(1));

        poller.refresh().await.unwrap();
        assert_eq!(poller.latest(), Some(2));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_value() {
        let fail = Arc::new(AtomicBool::new(false));
        let fail_ref = Arc::clone(&fail);
        let poller = Poller::new("flaky", move || {
            let fail = fail_ref.load(Ordering::SeqCst);
            async move {
                if fail {
                    anyhow::bail!("unreachable backend");
                }
                Ok(7u32)
            }
            .boxed()
        });

        poller.refresh().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(poller.refresh().await.is_err());
        assert_eq!(poller.latest(), Some(7));
    }

    #[tokio::test]
    async fn test_paused_poller_skips_background_ticks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(Arc::clone(&counter));
        poller.pause();

        let handle = poller.spawn(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        poller.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_in_flight_poll_is_discarded_after_pause() {
        let counter = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::clone(&counter);
        let poller = Poller::new("slow", move || {
            let fetches = Arc::clone(&fetches);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(fetches.fetch_add(1, Ordering::SeqCst) + 1)
            }
            .boxed()
        });

        let handle = poller.spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(20)).await;
        poller.pause();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "the first fetch completed");
        assert_eq!(poller.latest(), None);

        handle.abort();
    }

    #[tokio::test]
    async fn test_in_flight_poll_does_not_overwrite_refresh() {
        let slow = Arc::new(AtomicBool::new(true));
        let slow_ref = Arc::clone(&slow);
        let poller = Poller::new("stale", move || {
            let slow = slow_ref.swap(false, Ordering::SeqCst);
            async move {
                if slow {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    return Ok("stale");
                }
                Ok("fresh")
            }
            .boxed()
        });

        let handle = poller.spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(20)).await;
        poller.refresh().await.unwrap();
        assert_eq!(poller.latest(), Some("fresh"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(poller.latest(), Some("fresh"));

        handle.abort();
    }

    #[test]
    fn test_pause_guard_resumes_on_drop() {
        let pollers = pollers();
        {
            let _pause = pollers.pause_all();
            assert!(pollers.all_paused());
        }
        assert!(!pollers.any_paused());
    }

    #[test]
    fn test_pause_guard_resumes_on_panic() {
        let pollers = pollers();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _pause = pollers.pause_all();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!pollers.any_paused());
    }
}

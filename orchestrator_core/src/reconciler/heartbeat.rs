//! Generic interval loop shared by every reconciler.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use cluster_shared_types::Result;

/// Run `check` every `interval` until `cancel` fires.
///
/// The first run happens one interval after the start. A failing check is
/// logged and the loop carries on. A check still running when `cancel`
/// fires is dropped.
pub async fn heartbeat<F, Fut>(name: &str, interval: Duration, cancel: CancellationToken, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    heartbeat_with_context(name, interval, cancel, move |_| check()).await
}

/// Same as [`heartbeat`] but `check` receives the loop's token.
pub async fn heartbeat_with_context<F, Fut>(
    name: &str,
    interval: Duration,
    cancel: CancellationToken,
    mut check: F,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = check(cancel.clone()) => {
                if let Err(e) = result {
                    error!(reconciler = name, error = %e, "Heartbeat failed");
                }
            }
        }
    }
    debug!(reconciler = name, "Heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_shared_types::OrchestrationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = calls.clone();
        let loop_task = tokio::spawn(heartbeat(
            "test",
            Duration::from_secs(10),
            cancel.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestrationError::InternalError("boom".to_string()))
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        loop_task.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let counter = calls.clone();
        heartbeat_with_context("test", Duration::from_secs(1), cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_can_stop_its_own_loop() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        heartbeat_with_context("test", Duration::from_secs(1), cancel.clone(), move |token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Ok(())
            }
        })
        .await;

        assert!(cancel.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

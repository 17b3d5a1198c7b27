use std::time::Duration;

/// Polls `condition` until it holds or `timeout` elapses. Returns whether it held.
///
/// Works with tokio's paused time, where the sleeps advance the clock instantly.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll_interval = Duration::from_millis(10);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        if tokio::time::Instant::now() >= deadline {
            return false;
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Blocking variant of [`wait_until`] for plain threads.
pub fn wait_until_blocking<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll_interval = Duration::from_millis(5);
    let deadline = std::time::Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        if std::time::Instant::now() >= deadline {
            return false;
        }

        std::thread::sleep(poll_interval);
    }
}

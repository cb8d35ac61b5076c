use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

const INITIAL_DELAY_MS: u64 = 10;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when a condition never became true.
#[derive(Debug)]
pub struct WaitError {
    what: String,
    attempts: u32,
    waited: Duration,
    last_observed: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last observed: {}",
            self.attempts,
            self.waited,
            self.what,
            self.last_observed
                .as_deref()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or("<empty>"),
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `observe` until `predicate` accepts its value.
///
/// Uses exponential backoff starting at 10ms, capped at 500ms between
/// attempts.
pub async fn wait_for<T, O, F>(
    what: &str,
    mut observe: O,
    predicate: F,
    timeout: Duration,
) -> Result<T, WaitError>
where
    T: fmt::Debug,
    O: FnMut() -> T,
    F: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_observed = None;

    loop {
        attempts += 1;
        let value = observe();
        if predicate(&value) {
            return Ok(value);
        }
        last_observed = Some(format!("{value:?}"));

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        tokio::time::sleep(delay.min(remaining)).await;
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }

    Err(WaitError {
        what: what.to_string(),
        attempts,
        waited: start.elapsed(),
        last_observed,
    })
}

/// Await `future`, failing the test with `what` if it takes longer than `timeout`
pub async fn within<F: Future>(what: &str, timeout: Duration, future: F) -> F::Output {
    match tokio::time::timeout(timeout, future).await {
        Ok(output) => output,
        Err(_) => panic!("Timed out after {timeout:?} waiting for {what}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_returns_matching_value() {
        let value = wait_for("answer", || 42, |v| *v == 42, Duration::from_secs(1))
            .await
            .expect("should match immediately");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn wait_for_times_out_with_context() {
        let err = wait_for("ready flag", || false, |v| *v, Duration::from_millis(20))
            .await
            .expect_err("should time out");
        assert!(err.to_string().contains("ready flag"));
        assert!(err.to_string().contains("false"));
    }
}

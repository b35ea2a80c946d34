//! Bounded retry for network operations.

use std::time::Duration;

/// Run `action` up to `max_attempts` times, sleeping `delay` between
/// attempts. The final error is returned untouched.
pub fn with_retry<T, E: std::fmt::Display>(
    description: &str,
    max_attempts: u32,
    delay: Duration,
    mut action: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    description,
                    attempt,
                    max_attempts,
                    err
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retry("flaky", 3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err("not yet")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn surfaces_final_error_after_exhaustion() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retry("doomed", 3, Duration::from_millis(1), || {
            calls += 1;
            Err("still broken")
        });
        assert_eq!(result, Err("still broken"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn first_success_makes_one_attempt() {
        let mut calls = 0;
        let result: Result<&str, &str> = with_retry("fine", 5, Duration::from_millis(1), || {
            calls += 1;
            Ok("done")
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 1);
    }
}

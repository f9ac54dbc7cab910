/// Exponential backoff with a hard cap.
///
/// The delay after `n` consecutive failures is `min(base * 2^n, max)`;
/// a success resets the failure count, so the next backoff starts from
/// `base * 2` again.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl RetryBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    pub fn delay_ms(&self, consecutive_failures: u32) -> u64 {
        let factor = 2u64.saturating_pow(consecutive_failures.min(32));
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn doubles_per_failure_up_to_cap() {
        let backoff = RetryBackoff::new(5_000, 60_000);

        assert_eq!(backoff.delay_ms(0), 5_000);
        assert_eq!(backoff.delay_ms(1), 10_000);
        assert_eq!(backoff.delay_ms(2), 20_000);
        assert_eq!(backoff.delay_ms(3), 40_000);
        assert_eq!(backoff.delay_ms(4), 60_000);
        assert_eq!(backoff.delay_ms(30), 60_000);
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let backoff = RetryBackoff::new(1, u64::MAX);
        assert_eq!(backoff.delay_ms(u32::MAX), 2u64.pow(32));
    }
}

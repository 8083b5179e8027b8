use std::time::Duration;




/**
 * An infinite stream of retry delays which grow by a constant factor up to
 * a ceiling, after which the ceiling is returned forever. Used to pace
 * reconnection attempts while a peer process is still coming up.
 */
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}




// ============================================================================
impl ExponentialBackoff {

    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.curr;
        self.curr = std::cmp::min(self.curr * self.factor, self.max);
        Some(delay)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::time::Duration;
    use super::ExponentialBackoff;

    #[test]
    fn delays_double_and_saturate() {
        let delays: Vec<_> = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2)
            .take(5)
            .collect();

        assert_eq!(delays, vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(500),
            Duration::from_millis(500),
        ]);
    }
}

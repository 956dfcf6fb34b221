//! N-consecutive-matches counter shared by the proximity and gesture state machines.

/// Counts consecutive observations of the same target value.
///
/// Recording a different value restarts the count for that value. The proximity
/// analyzer uses `ConsecutiveMatch<()>` as a plain streak counter; the gesture
/// controller tracks which gesture the current streak belongs to.
#[derive(Debug, Clone)]
pub struct ConsecutiveMatch<T> {
    threshold: u32,
    target: Option<T>,
    count: u32,
}

impl<T: PartialEq + Clone> ConsecutiveMatch<T> {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            target: None,
            count: 0,
        }
    }

    /// Record one matching observation and return the streak length.
    /// The count saturates at `u32::MAX`.
    pub fn record(&mut self, value: T) -> u32 {
        if self.target.as_ref() == Some(&value) {
            self.count = self.count.saturating_add(1);
        } else {
            self.target = Some(value);
            self.count = 1;
        }
        self.count
    }

    /// Record `value` only if `predicate` accepts it; a rejected value is a miss and resets.
    pub fn record_if<F>(&mut self, value: T, predicate: F) -> u32
    where
        F: FnOnce(&T) -> bool,
    {
        if predicate(&value) {
            self.record(value)
        } else {
            self.reset();
            0
        }
    }

    pub fn reset(&mut self) {
        self.target = None;
        self.count = 0;
    }

    pub fn is_satisfied(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn target(&self) -> Option<&T> {
        self.target.as_ref()
    }
}

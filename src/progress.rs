/// Receives completion percentages in `[0, 100]` from long-running operations.
///
/// Callbacks are invoked on the calling thread only. Values are monotone
/// within a single operation.
pub trait ProgressSink {
    fn progress(&self, percent: f64);
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _percent: f64) {}
}

impl<F> ProgressSink for F
where
    F: Fn(f64),
{
    fn progress(&self, percent: f64) {
        self(percent)
    }
}

/// Throttles per-item progress of a loop with a known length to whole-percent steps.
pub struct Milestones<'a> {
    sink: &'a dyn ProgressSink,
    total: usize,
    done: usize,
    last: i64,
}

impl<'a> Milestones<'a> {
    pub fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        Self {
            sink,
            total,
            done: 0,
            last: -1,
        }
    }

    pub fn advance(&mut self) {
        self.advance_by(1);
    }

    pub fn advance_by(&mut self, count: usize) {
        self.done = (self.done + count).min(self.total);
        let percent = if self.total == 0 {
            100
        } else {
            (self.done * 100 / self.total) as i64
        };
        if percent > self.last {
            self.last = percent;
            self.sink.progress(percent as f64);
        }
    }

    pub fn finish(&mut self) {
        if self.last < 100 {
            self.last = 100;
            self.sink.progress(100.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn milestones_are_monotone_and_finish_at_100() {
        let seen = RefCell::new(Vec::new());
        let sink = |percent: f64| seen.borrow_mut().push(percent);
        let mut milestones = Milestones::new(&sink, 1000);
        for _ in 0..1000 {
            milestones.advance();
        }
        milestones.finish();
        let seen = seen.into_inner();
        assert!(seen.len() <= 101);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[test]
    fn empty_loop_reports_completion_once() {
        let seen = RefCell::new(Vec::new());
        let sink = |percent: f64| seen.borrow_mut().push(percent);
        let mut milestones = Milestones::new(&sink, 0);
        milestones.finish();
        milestones.finish();
        assert_eq!(seen.into_inner(), vec![100.0]);
    }
}

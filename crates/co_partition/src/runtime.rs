/// What a cell wants after one slice of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunResult {
    /// Finished; drop the cell.
    Done,

    /// More work pending right now; run again on the next tick.
    Again,

    /// Sleep until the given time.
    At(i64),
}

/// One cooperatively scheduled unit of partition work.
///
/// A cell runs to its next natural boundary (one log batch, one customer,
/// one segment) and yields; there is no preemption, so every yield point is
/// a consistent state.
pub trait Cell<S>: Send {
    fn name(&self) -> &'static str;

    fn run(&mut self, state: &mut S, now_ms: i64) -> RunResult;
}

struct Scheduled<S> {
    cell: Box<dyn Cell<S>>,
    due: i64,
}

/// The cooperative task loop: always runs the next-due cell.
pub struct TaskLoop<S> {
    cells: Vec<Scheduled<S>>,
}

impl<S> Default for TaskLoop<S> {
    fn default() -> Self {
        Self { cells: Vec::new() }
    }
}

impl<S> TaskLoop<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn add(&mut self, cell: Box<dyn Cell<S>>, due_ms: i64) {
        self.cells.push(Scheduled { cell, due: due_ms });
    }

    /// Time the next cell comes due, if any.
    pub fn next_due(&self) -> Option<i64> {
        self.cells.iter().map(|scheduled| scheduled.due).min()
    }

    /// Run the single next-due cell. Returns false when nothing is due.
    pub fn tick(&mut self, state: &mut S, now_ms: i64) -> bool {
        let Some(index) = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, scheduled)| scheduled.due <= now_ms)
            .min_by_key(|(_, scheduled)| scheduled.due)
            .map(|(index, _)| index)
        else {
            return false;
        };

        let scheduled = &mut self.cells[index];
        let result = scheduled.cell.run(state, now_ms);
        match result {
            RunResult::Done => {
                co_log::trace!(cell = self.cells[index].cell.name(), "cell finished");
                self.cells.swap_remove(index);
            }
            RunResult::Again => self.cells[index].due = now_ms,
            RunResult::At(due) => self.cells[index].due = due,
        }
        true
    }

    /// Drain everything currently due. Bounded so a cell stuck on `Again`
    /// cannot starve the caller's loop.
    pub fn run_due(&mut self, state: &mut S, now_ms: i64) -> usize {
        const MAX_SLICES: usize = 1024;
        let mut ran = 0;
        while ran < MAX_SLICES && self.tick(state, now_ms) {
            ran += 1;
        }
        ran
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        left: usize,
        interval: i64,
    }

    impl Cell<Vec<&'static str>> for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn run(&mut self, log: &mut Vec<&'static str>, now_ms: i64) -> RunResult {
            log.push("counter");
            self.left -= 1;
            if self.left == 0 {
                RunResult::Done
            } else {
                RunResult::At(now_ms + self.interval)
            }
        }
    }

    #[test]
    fn cells_run_when_due_and_retire_when_done() {
        let mut tasks = TaskLoop::new();
        let mut log = Vec::new();

        tasks.add(
            Box::new(Counter {
                left: 2,
                interval: 100,
            }),
            0,
        );

        assert!(tasks.tick(&mut log, 0));
        assert!(!tasks.tick(&mut log, 50)); // not due yet
        assert_eq!(tasks.next_due(), Some(100));
        assert!(tasks.tick(&mut log, 100));
        assert!(tasks.is_empty());
        assert_eq!(log.len(), 2);
    }

    struct Greedy;

    impl Cell<Vec<&'static str>> for Greedy {
        fn name(&self) -> &'static str {
            "greedy"
        }

        fn run(&mut self, log: &mut Vec<&'static str>, _now_ms: i64) -> RunResult {
            log.push("greedy");
            RunResult::Again
        }
    }

    #[test]
    fn run_due_is_bounded_against_greedy_cells() {
        let mut tasks = TaskLoop::new();
        let mut log = Vec::new();
        tasks.add(Box::new(Greedy), 0);

        let ran = tasks.run_due(&mut log, 0);
        assert_eq!(ran, 1024);
        assert_eq!(tasks.len(), 1);
    }
}

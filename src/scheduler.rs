use std::fmt;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) i64);

impl TimerId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: TimerId,
    pub due_at: i64,
    pub order: i64,
    pub label: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ScheduledTask<T> {
    pub(crate) id: TimerId,
    pub(crate) due_at: i64,
    pub(crate) order: i64,
    pub(crate) payload: T,
}

/// Virtual clock plus a one-shot timer queue. Tasks run in `(due_at, order)`
/// order; the owner pops them and dispatches the payload.
#[derive(Debug, Clone)]
pub(crate) struct Scheduler<T> {
    now_ms: i64,
    queue: Vec<ScheduledTask<T>>,
    next_timer_id: i64,
    next_task_order: i64,
    step_limit: usize,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            now_ms: 0,
            queue: Vec::new(),
            next_timer_id: 1,
            next_task_order: 0,
            step_limit: 10_000,
        }
    }
}

impl<T: fmt::Debug> Scheduler<T> {
    pub(crate) fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub(crate) fn step_limit(&self) -> usize {
        self.step_limit
    }

    pub(crate) fn set_step_limit(&mut self, limit: usize) {
        self.step_limit = limit.max(1);
    }

    pub(crate) fn schedule_timeout(&mut self, payload: T, delay_ms: i64) -> (TimerId, i64) {
        let delay_ms = delay_ms.max(0);
        let due_at = self.now_ms.saturating_add(delay_ms);
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        self.queue.push(ScheduledTask {
            id,
            due_at,
            order,
            payload,
        });
        (id, due_at)
    }

    pub(crate) fn clear(&mut self, id: TimerId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|task| task.id != id);
        before != self.queue.len()
    }

    pub(crate) fn pending(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
                label: format!("{:?}", task.payload),
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    /// Moves the clock forward without running anything.
    pub(crate) fn set_now(&mut self, now_ms: i64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// Removes the next task due at or before `due_limit` (any task when
    /// `None`). With `advance_clock` the clock jumps to the task's due time.
    pub(crate) fn pop_next(
        &mut self,
        due_limit: Option<i64>,
        advance_clock: bool,
    ) -> Option<ScheduledTask<T>> {
        let idx = self.next_task_index(due_limit)?;
        let task = self.queue.remove(idx);
        if advance_clock && task.due_at > self.now_ms {
            self.now_ms = task.due_at;
        }
        Some(task)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, task)| due_limit.is_none_or(|limit| task.due_at <= limit))
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    pub(crate) fn step_limit_error(&self) -> Error {
        Error::TimerStepLimit {
            limit: self.step_limit,
            now_ms: self.now_ms,
            pending: self.queue.len(),
        }
    }
}

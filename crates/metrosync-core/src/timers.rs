//! Owned, cancellable timers for single-threaded state machines.
//!
//! Each state machine keeps one [`TimerSet`] and polls it with the current
//! time. Nothing fires on its own; a phase-ending transition drains the set
//! so no stale callback can run into the next state.

/// Handle to one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone)]
struct TimerEntry<K> {
    handle: TimerHandle,
    key: K,
    deadline: f64,
    period: Option<f64>,
}

/// Set of one-shot and periodic timers keyed by `K`.
#[derive(Debug, Clone)]
pub struct TimerSet<K> {
    next_id: u64,
    entries: Vec<TimerEntry<K>>,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<K: Clone> TimerSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_once(&mut self, key: K, deadline: f64) -> TimerHandle {
        self.arm(key, deadline, None)
    }

    /// Fires first at `first_deadline`, then every `period`.
    pub fn arm_periodic(&mut self, key: K, first_deadline: f64, period: f64) -> TimerHandle {
        self.arm(key, first_deadline, Some(period.max(f64::EPSILON)))
    }

    fn arm(&mut self, key: K, deadline: f64, period: Option<f64>) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.entries.push(TimerEntry {
            handle,
            key,
            deadline,
            period,
        });
        handle
    }

    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        self.entries.len() != before
    }

    /// Cancels every timer whose key matches. Returns how many were removed.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !pred(&e.key));
        before - self.entries.len()
    }

    pub fn count_where(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.key)).count()
    }

    /// First timer, in arming order, whose key matches. Returns its deadline.
    pub fn find(&self, mut pred: impl FnMut(&K) -> bool) -> Option<(&K, f64)> {
        self.entries
            .iter()
            .find(|e| pred(&e.key))
            .map(|e| (&e.key, e.deadline))
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.entries
            .iter()
            .map(|e| e.deadline)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Removes (or reschedules, if periodic) the earliest timer due at `now`.
    ///
    /// Ties fire in arming order. A periodic timer that fell more than one
    /// period behind is rescheduled from `now` instead of bursting.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimerHandle, K)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by(|(_, a), (_, b)| {
                a.deadline
                    .total_cmp(&b.deadline)
                    .then(a.handle.cmp(&b.handle))
            })
            .map(|(i, _)| i)?;

        match self.entries[idx].period {
            Some(period) => {
                let entry = &mut self.entries[idx];
                entry.deadline += period;
                if entry.deadline <= now {
                    entry.deadline = now + period;
                }
                Some((entry.handle, entry.key.clone()))
            }
            None => {
                let entry = self.entries.remove(idx);
                Some((entry.handle, entry.key))
            }
        }
    }

    /// Cancels everything.
    pub fn drain(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// src/engine/scheduler.rs
//! Cooperative virtual-time timer set
//!
//! One tick source drives every timer. `advance` moves the virtual clock,
//! then the owner drains due firings with `pop_due` one at a time, so a
//! handler that cancels other timers takes effect before they are popped.
//! A single large advance catches up on every elapsed interval in due-time
//! order; ties are broken by creation order.

use crate::config::constants::timing;
use crate::hal::Target;
use std::fmt;
use std::time::Duration;

/// Handle of one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Work item carried by engine timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    /// Progress tick of the timed action at `action`
    Progress { action: usize },
    /// Switch poll of one channel of the switch-gated action at `action`
    SwitchPoll { action: usize, target: Target },
    /// Overrun guard of the grab action at `action`
    GrabDeadline { action: usize },
    /// Leave the completion sub-state
    DoneAdvance,
    /// Return to the first step after the terminal step
    StartOver,
}

/// One due timer, handed to the owner for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Firing<T> {
    pub id: TimerId,
    /// Generation of the owner that scheduled the timer
    pub generation: u64,
    pub task: T,
    /// Interval accounted by this firing
    pub dt: Duration,
}

#[derive(Debug)]
struct Timer<T> {
    id: TimerId,
    generation: u64,
    task: T,
    interval: Duration,
    repeating: bool,
    due: Duration,
}

/// Single-threaded timer set over a virtual clock
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    timers: Vec<Timer<T>>,
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            timers: Vec::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Fire `task` every `interval`, first at `now + interval`
    pub fn schedule_repeating(&mut self, interval: Duration, generation: u64, task: T) -> TimerId {
        let interval = interval.max(Duration::from_millis(timing::MIN_TICK_MS));
        self.insert(interval, true, generation, task)
    }

    /// Fire `task` once at `now + delay`
    pub fn schedule_once(&mut self, delay: Duration, generation: u64, task: T) -> TimerId {
        self.insert(delay, false, generation, task)
    }

    fn insert(&mut self, interval: Duration, repeating: bool, generation: u64, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.push(Timer {
            id,
            generation,
            task,
            interval,
            repeating,
            due: self.now + interval,
        });
        id
    }

    /// Cancel one timer; returns false if it already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Cancel everything
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        count
    }

    pub fn is_live(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Move the virtual clock forward
    pub fn advance(&mut self, dt: Duration) {
        self.now += dt;
    }

    /// Take the earliest due firing, rescheduling repeating timers
    pub fn pop_due(&mut self) -> Option<Firing<T>> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= self.now)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(index, _)| index)?;

        let timer = &mut self.timers[index];
        let firing = Firing {
            id: timer.id,
            generation: timer.generation,
            task: timer.task.clone(),
            dt: timer.interval,
        };

        if timer.repeating {
            timer.due += timer.interval;
        } else {
            self.timers.remove(index);
        }
        Some(firing)
    }

    /// Advance and collect every firing, without interleaved dispatch
    pub fn tick(&mut self, dt: Duration) -> Vec<Firing<T>> {
        self.advance(dt);
        std::iter::from_fn(|| self.pop_due()).collect()
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_repeating_timer_catches_up() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_repeating(ms(500), 1, "tick");

        assert!(scheduler.tick(ms(499)).is_empty());
        let firings = scheduler.tick(ms(1001));
        assert_eq!(firings.len(), 3);
        assert!(firings.iter().all(|f| f.dt == ms(500) && f.generation == 1));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.schedule_once(ms(1000), 0, "once");

        assert_eq!(scheduler.tick(ms(5000)).len(), 1);
        assert!(!scheduler.is_live(id));
        assert!(scheduler.tick(ms(5000)).is_empty());
    }

    #[test]
    fn test_firings_ordered_by_due_time_then_creation() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_once(ms(300), 0, "late");
        scheduler.schedule_repeating(ms(100), 0, "poll-a");
        scheduler.schedule_repeating(ms(100), 0, "poll-b");

        let order: Vec<_> = scheduler.tick(ms(300)).into_iter().map(|f| f.task).collect();
        assert_eq!(
            order,
            vec!["poll-a", "poll-b", "poll-a", "poll-b", "late", "poll-a", "poll-b"]
        );
    }

    #[test]
    fn test_cancellation_between_pops() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.schedule_repeating(ms(100), 0, 1);
        let second = scheduler.schedule_repeating(ms(100), 0, 2);

        scheduler.advance(ms(100));
        let firing = scheduler.pop_due().unwrap();
        assert_eq!(firing.id, first);
        assert!(scheduler.cancel(second));
        assert!(scheduler.pop_due().is_none());
        assert!(!scheduler.cancel(second));
    }

    #[test]
    fn test_cancel_all() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_repeating(ms(100), 3, ());
        scheduler.schedule_once(ms(100), 3, ());
        scheduler.schedule_once(ms(100), 4, ());

        assert_eq!(scheduler.len(), 3);
        assert_eq!(scheduler.cancel_all(), 3);
        assert!(scheduler.is_empty());
    }
}

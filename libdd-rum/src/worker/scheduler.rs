// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deadline bookkeeping of the worker's periodic duties. Each event
//! kind has one delay and at most one pending deadline; the worker
//! sleeps until the earliest one.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct Scheduler<T: Clone + Eq> {
    delays: Vec<(Duration, T)>,
    deadlines: Vec<(Instant, T)>,
    now: Now,
}

impl<T: Clone + Eq> Scheduler<T> {
    pub fn new(mut delays: Vec<(Duration, T)>) -> Self {
        delays.sort_by_key(|(d, _)| *d);
        Self {
            delays,
            deadlines: Vec::new(),
            now: Now::Std,
        }
    }

    pub fn next_deadline(&self) -> Option<(Instant, &T)> {
        let (instant, event) = self.deadlines.first()?;
        Some((*instant, event))
    }

    /// Changes the delay of `event`; takes effect at its next
    /// scheduling. Used when the server delivers a new send interval.
    pub fn set_delay(&mut self, event: &T, delay: Duration) {
        if let Some(entry) = self.delays.iter_mut().find(|(_, e)| e == event) {
            entry.0 = delay;
        }
    }

    pub fn schedule_events(&mut self, events: impl IntoIterator<Item = T>) -> Result<(), T> {
        let now = self.now.now();
        for event in events {
            self.schedule_event_from(event, now)?;
        }
        Ok(())
    }

    pub fn schedule_event(&mut self, event: T) -> Result<(), T> {
        self.schedule_event_from(event, self.now.now())
    }

    fn schedule_event_from(&mut self, event: T, from: Instant) -> Result<(), T> {
        let (delay, _) = match self.delays.iter().find(|(_, e)| e == &event) {
            Some(entry) => entry,
            None => return Err(event),
        };
        let deadline = from + *delay;
        if let Some((idx, _)) = self
            .deadlines
            .iter()
            .enumerate()
            .find(|(_, (_, e))| e == &event)
        {
            self.deadlines.remove(idx);
        }
        let insert_idx = self
            .deadlines
            .binary_search_by(|(d, _)| d.cmp(&deadline))
            .unwrap_or_else(|e| e);
        self.deadlines.insert(insert_idx, (deadline, event));
        Ok(())
    }

    pub fn clear_pending(&mut self) {
        self.deadlines.clear();
    }

    #[cfg(test)]
    fn set_now(&mut self, instant: Instant) {
        self.now = Now::Mock(instant);
    }
}

#[derive(Debug)]
enum Now {
    Std,
    #[cfg(test)]
    Mock(Instant),
}

impl Now {
    fn now(&self) -> Instant {
        match self {
            Self::Std => Instant::now(),
            #[cfg(test)]
            Self::Mock(now) => *now,
        }
    }
}

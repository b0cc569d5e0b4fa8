// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Sampled timers. Nothing here schedules anything: the collection loop reads
//! the clock once per iteration and compares against a stored mark.

use std::time::{Duration, Instant};

// ============================================================================
// Clock Trait
// ============================================================================

/// Source of elapsed time since an arbitrary fixed origin
pub trait Clock: Send {
    fn now(&self) -> Duration;
}

/// Real clock backed by `Instant`
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

// ============================================================================
// Keepalive Timer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveTrigger {
    /// Needs a fresh mark on the next sample
    Reset,
    /// Counting from the stored mark
    Armed,
    /// Interval elapsed, a keepalive should be sent
    Due,
}

#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    trigger: KeepaliveTrigger,
    mark: Duration,
}

impl Keepalive {
    /// A zero interval disables keepalives.
    pub fn new(interval: Duration) -> Self {
        Keepalive {
            interval,
            trigger: KeepaliveTrigger::Reset,
            mark: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.trigger = KeepaliveTrigger::Reset;
    }

    pub fn trigger(&self) -> KeepaliveTrigger {
        self.trigger
    }

    pub fn reset(&mut self) {
        self.trigger = KeepaliveTrigger::Reset;
    }

    /// Advance the trigger using the current time and report whether a keepalive is due.
    pub fn sample(&mut self, now: Duration) -> bool {
        if self.interval.is_zero() {
            return false;
        }

        match self.trigger {
            KeepaliveTrigger::Reset => {
                self.mark = now;
                self.trigger = KeepaliveTrigger::Armed;
            }
            KeepaliveTrigger::Armed => {
                if now.saturating_sub(self.mark) >= self.interval {
                    self.trigger = KeepaliveTrigger::Due;
                }
            }
            KeepaliveTrigger::Due => {}
        }

        self.trigger == KeepaliveTrigger::Due
    }
}

// ============================================================================
// Manual Clock for Testing
// ============================================================================

#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(std::sync::atomic::Ordering::SeqCst))
    }
}

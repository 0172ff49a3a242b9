//! Cooperative scheduler
//!
//! Manual clock with timers and animation frame callbacks. Nothing runs on its
//! own: the host advances time with `Document::advance_time` and paints with
//! `Document::run_animation_frame`.

use crate::document::Document;

/// Timer handle returned by `set_timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Animation frame handle returned by `request_animation_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) u64);

pub(crate) type TimerCallback = Box<dyn FnOnce(&Document)>;
pub(crate) type FrameCallback = Box<dyn FnOnce(&Document, f64)>;

struct Timer {
    id: TimerId,
    due: f64,
    callback: TimerCallback,
}

/// Clock, timer queue and frame queue
pub(crate) struct Scheduler {
    now: f64,
    timers: Vec<Timer>,
    frames: Vec<(FrameId, FrameCallback)>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(now: f64) -> Self {
        Self {
            now,
            timers: Vec::new(),
            frames: Vec::new(),
            next_id: 0,
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    pub fn set_timeout(&mut self, delay: f64, callback: TimerCallback) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer {
            id,
            due: self.now + delay.max(0.0),
            callback,
        });
        id
    }

    pub fn clear_timeout(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }

    /// Remove the earliest timer due at or before `until`. Ties fire in
    /// registration order.
    pub fn pop_due(&mut self, until: f64) -> Option<(f64, TimerCallback)> {
        let mut best: Option<usize> = None;
        for (i, timer) in self.timers.iter().enumerate() {
            if timer.due > until {
                continue;
            }
            match best {
                Some(b) if self.timers[b].due <= timer.due => {}
                _ => best = Some(i),
            }
        }
        let timer = self.timers.remove(best?);
        Some((timer.due, timer.callback))
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn request_frame(&mut self, callback: FrameCallback) -> FrameId {
        self.next_id += 1;
        let id = FrameId(self.next_id);
        self.frames.push((id, callback));
        id
    }

    pub fn cancel_frame(&mut self, id: FrameId) {
        self.frames.retain(|(f, _)| *f != id);
    }

    /// Frames requested so far; frames requested while these run wait for
    /// the next paint
    pub fn take_frames(&mut self) -> Vec<FrameCallback> {
        std::mem::take(&mut self.frames)
            .into_iter()
            .map(|(_, callback)| callback)
            .collect()
    }
}

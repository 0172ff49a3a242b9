//! Throttling on the document scheduler
//!
//! At most one invocation per `wait` window: the leading call runs
//! immediately (unless disabled), later calls in the window replace the
//! pending value, and the last one runs when the window closes (unless
//! trailing is disabled).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use replay_dom::{Document, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    pub leading: bool,
    pub trailing: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: true,
        }
    }
}

impl ThrottleOptions {
    pub fn leading_only() -> Self {
        Self {
            leading: true,
            trailing: false,
        }
    }
}

struct ThrottleState<T> {
    callback: Box<dyn Fn(&Document, T)>,
    wait: f64,
    options: ThrottleOptions,
    in_wait_period: Cell<bool>,
    pending: RefCell<Option<T>>,
    timer: Cell<Option<TimerId>>,
}

/// Throttled callback. Clones share the same window.
pub struct Throttle<T> {
    state: Rc<ThrottleState<T>>,
}

impl<T> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Throttle<T> {
    pub fn new(wait: f64, options: ThrottleOptions, callback: impl Fn(&Document, T) + 'static) -> Self {
        Self {
            state: Rc::new(ThrottleState {
                callback: Box::new(callback),
                wait,
                options,
                in_wait_period: Cell::new(false),
                pending: RefCell::new(None),
                timer: Cell::new(None),
            }),
        }
    }

    pub fn call(&self, doc: &Document, value: T) {
        let state = &self.state;
        if state.in_wait_period.get() {
            *state.pending.borrow_mut() = Some(value);
            return;
        }

        state.in_wait_period.set(true);
        if state.options.leading {
            (state.callback)(doc, value);
        } else {
            *state.pending.borrow_mut() = Some(value);
        }

        let weak = Rc::downgrade(state);
        let timer = doc.set_timeout(state.wait, move |doc| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            state.timer.set(None);
            let pending = state.pending.borrow_mut().take();
            if state.options.trailing {
                if let Some(value) = pending {
                    (state.callback)(doc, value);
                }
            }
            state.in_wait_period.set(false);
        });
        state.timer.set(Some(timer));
    }

    /// Drop the pending call and close the window
    pub fn cancel(&self, doc: &Document) {
        if let Some(timer) = self.state.timer.take() {
            doc.clear_timeout(timer);
        }
        self.state.pending.borrow_mut().take();
        self.state.in_wait_period.set(false);
    }

    pub fn has_pending(&self) -> bool {
        self.state.pending.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(&Document, u32) + 'static) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        (calls, move |_: &Document, v: u32| sink.borrow_mut().push(v))
    }

    #[test]
    fn test_leading_and_trailing() {
        let doc = Document::new("https://example.com/");
        let (calls, callback) = recorder();
        let throttle = Throttle::new(100.0, ThrottleOptions::default(), callback);

        throttle.call(&doc, 1);
        throttle.call(&doc, 2);
        throttle.call(&doc, 3);
        assert_eq!(*calls.borrow(), vec![1]);

        doc.advance_time(100.0);
        assert_eq!(*calls.borrow(), vec![1, 3]);

        throttle.call(&doc, 4);
        assert_eq!(*calls.borrow(), vec![1, 3, 4]);
    }

    #[test]
    fn test_leading_only_drops_trailing() {
        let doc = Document::new("https://example.com/");
        let (calls, callback) = recorder();
        let throttle = Throttle::new(50.0, ThrottleOptions::leading_only(), callback);

        throttle.call(&doc, 1);
        throttle.call(&doc, 2);
        doc.advance_time(50.0);
        assert_eq!(*calls.borrow(), vec![1]);
        throttle.call(&doc, 3);
        assert_eq!(*calls.borrow(), vec![1, 3]);
    }

    #[test]
    fn test_cancel_discards_pending() {
        let doc = Document::new("https://example.com/");
        let (calls, callback) = recorder();
        let throttle = Throttle::new(100.0, ThrottleOptions::default(), callback);

        throttle.call(&doc, 1);
        throttle.call(&doc, 2);
        assert!(throttle.has_pending());
        throttle.cancel(&doc);
        doc.advance_time(200.0);
        assert_eq!(*calls.borrow(), vec![1]);
        assert_eq!(doc.pending_timers(), 0);
    }
}

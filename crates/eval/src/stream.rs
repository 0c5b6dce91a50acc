//! Single-threaded push streams.
//!
//! A `Stream` is a cold producer: every `subscribe` runs it anew with the
//! given `Observer` and returns the `Subscription` that tears it down.
//! Producers may deliver events synchronously, before `subscribe`
//! returns. Cancellation is structural: operators register the
//! subscriptions of their sources as children of their own.

use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Next(Value),
    Error(Value),
    Complete,
}

// ──────────────────────────────────────────────
// Observer
// ──────────────────────────────────────────────

/// Receives events until the first terminal event; later events are
/// dropped.
#[derive(Clone)]
pub struct Observer {
    sink: Rc<dyn Fn(Event)>,
    stopped: Rc<Cell<bool>>,
}

impl Observer {
    pub fn new(sink: impl Fn(Event) + 'static) -> Self {
        Observer {
            sink: Rc::new(sink),
            stopped: Rc::new(Cell::new(false)),
        }
    }

    pub fn emit(&self, event: Event) {
        if self.stopped.get() {
            return;
        }
        if !matches!(event, Event::Next(_)) {
            self.stopped.set(true);
        }
        (self.sink)(event);
    }

    pub fn next(&self, value: Value) {
        self.emit(Event::Next(value));
    }

    pub fn error(&self, error: Value) {
        self.emit(Event::Error(error));
    }

    pub fn complete(&self) {
        self.emit(Event::Complete);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

// ──────────────────────────────────────────────
// Subscription
// ──────────────────────────────────────────────

#[derive(Default)]
struct SubscriptionInner {
    closed: Cell<bool>,
    teardowns: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Cancellable handle. `unsubscribe` is idempotent and runs every
/// registered teardown exactly once; teardowns added after closing run
/// immediately.
#[derive(Clone, Default)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    pub fn new() -> Self {
        Subscription::default()
    }

    pub fn add(&self, teardown: impl FnOnce() + 'static) {
        if self.inner.closed.get() {
            teardown();
        } else {
            self.inner.teardowns.borrow_mut().push(Box::new(teardown));
        }
    }

    pub fn add_child(&self, child: Subscription) {
        if self.same(&child) {
            return;
        }
        self.add(move || child.unsubscribe());
    }

    pub fn unsubscribe(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let teardowns = std::mem::take(&mut *self.inner.teardowns.borrow_mut());
        for teardown in teardowns {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn same(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ──────────────────────────────────────────────
// Stream
// ──────────────────────────────────────────────

#[derive(Clone)]
pub struct Stream {
    producer: Rc<dyn Fn(Observer) -> Subscription>,
}

impl Stream {
    pub fn new(producer: impl Fn(Observer) -> Subscription + 'static) -> Self {
        Stream {
            producer: Rc::new(producer),
        }
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        (self.producer)(observer)
    }

    /// Emits `values` synchronously on subscribe, then completes.
    pub fn of(values: Vec<Value>) -> Stream {
        Stream::new(move |observer| {
            for v in &values {
                if observer.is_stopped() {
                    break;
                }
                observer.next(v.clone());
            }
            observer.complete();
            Subscription::new()
        })
    }

    /// Errors synchronously on subscribe.
    pub fn fail(error: Value) -> Stream {
        Stream::new(move |observer| {
            observer.error(error.clone());
            Subscription::new()
        })
    }

    pub fn same(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.producer, &other.producer)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stream")
    }
}

// ──────────────────────────────────────────────
// Subject
// ──────────────────────────────────────────────

#[derive(Default)]
struct SubjectInner {
    observers: RefCell<Vec<(u64, Observer)>>,
    next_key: Cell<u64>,
    terminal: RefCell<Option<Event>>,
}

/// Hot multicast source driven from the host. Late subscribers to a
/// terminated subject receive only the terminal event.
#[derive(Clone, Default)]
pub struct Subject {
    inner: Rc<SubjectInner>,
}

impl Subject {
    pub fn new() -> Self {
        Subject::default()
    }

    fn broadcast(&self, event: Event) {
        if self.inner.terminal.borrow().is_some() {
            return;
        }
        if !matches!(event, Event::Next(_)) {
            *self.inner.terminal.borrow_mut() = Some(event.clone());
        }
        // Snapshot: observers may subscribe or unsubscribe re-entrantly.
        let observers: Vec<Observer> = self
            .inner
            .observers
            .borrow()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for o in observers {
            o.emit(event.clone());
        }
        if !matches!(event, Event::Next(_)) {
            self.inner.observers.borrow_mut().clear();
        }
    }

    pub fn next(&self, value: impl Into<Value>) {
        self.broadcast(Event::Next(value.into()));
    }

    pub fn error(&self, error: impl Into<Value>) {
        self.broadcast(Event::Error(error.into()));
    }

    pub fn complete(&self) {
        self.broadcast(Event::Complete);
    }

    /// Number of live subscriptions; used to check for leaks.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn stream(&self) -> Stream {
        let weak: Weak<SubjectInner> = Rc::downgrade(&self.inner);
        Stream::new(move |observer| {
            let Some(inner) = weak.upgrade() else {
                observer.complete();
                return Subscription::new();
            };
            let terminal = inner.terminal.borrow().clone();
            if let Some(event) = terminal {
                observer.emit(event);
                return Subscription::new();
            }
            let key = inner.next_key.get();
            inner.next_key.set(key + 1);
            inner.observers.borrow_mut().push((key, observer));
            let weak = Rc::downgrade(&inner);
            let sub = Subscription::new();
            sub.add(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.observers.borrow_mut().retain(|(k, _)| *k != key);
                }
            });
            sub
        })
    }
}

impl From<Subject> for Value {
    fn from(s: Subject) -> Self {
        Value::Stream(s.stream())
    }
}

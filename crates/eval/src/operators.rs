//! The runtime primitives lowered pipelines are built from: `combine`,
//! `transform`, `flatten_latest` and `default_until_first`.
//!
//! Every operator owns one `Subscription` per subscriber and registers
//! its upstream subscriptions as children, so unsubscribing the output
//! tears down every source. An upstream error is delivered downstream
//! before that teardown runs.

use crate::stream::{Event, Observer, Stream, Subscription};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct CombineState {
    latest: Vec<Option<Value>>,
    have: usize,
    completed: usize,
}

/// Stream of latest-value tuples. Emits once every source has emitted,
/// then on every emission of any source. Completes when all sources
/// have completed; with no sources, emits one empty tuple and completes.
pub fn combine(sources: Vec<Stream>) -> Stream {
    let sources = Rc::new(sources);
    Stream::new(move |down| {
        let n = sources.len();
        let sub = Subscription::new();
        if n == 0 {
            down.next(Value::Array(Vec::new()));
            down.complete();
            return sub;
        }
        let state = Rc::new(RefCell::new(CombineState {
            latest: vec![None; n],
            have: 0,
            completed: 0,
        }));
        for (i, source) in sources.iter().enumerate() {
            if sub.is_closed() {
                break;
            }
            let state = state.clone();
            let d = down.clone();
            let owner = sub.clone();
            let observer = Observer::new(move |event| match event {
                Event::Next(v) => {
                    let tuple = {
                        let mut s = state.borrow_mut();
                        if s.latest[i].is_none() {
                            s.have += 1;
                        }
                        s.latest[i] = Some(v);
                        if s.have == n {
                            Some(s.latest.iter().flatten().cloned().collect())
                        } else {
                            None
                        }
                    };
                    if let Some(values) = tuple {
                        d.next(Value::Array(values));
                    }
                }
                Event::Error(e) => {
                    d.error(e);
                    owner.unsubscribe();
                }
                Event::Complete => {
                    let all_done = {
                        let mut s = state.borrow_mut();
                        s.completed += 1;
                        s.completed == n
                    };
                    if all_done {
                        d.complete();
                        owner.unsubscribe();
                    }
                }
            });
            sub.add_child(source.subscribe(observer));
        }
        sub
    })
}

/// Applies `f` to every value. A failing `f` errors the output and
/// unsubscribes the source.
pub fn transform(source: Stream, f: Rc<dyn Fn(Value) -> Result<Value, Value>>) -> Stream {
    Stream::new(move |down| {
        let sub = Subscription::new();
        let f = f.clone();
        let d = down.clone();
        let owner = sub.clone();
        let upstream = source.subscribe(Observer::new(move |event| match event {
            Event::Next(v) => match f(v) {
                Ok(out) => d.next(out),
                Err(e) => {
                    d.error(e);
                    owner.unsubscribe();
                }
            },
            other => d.emit(other),
        }));
        sub.add_child(upstream);
        sub
    })
}

struct SwitchState {
    inner: Option<Subscription>,
    generation: u64,
    inner_active: bool,
    outer_done: bool,
}

/// Switch-to-latest: follows the most recently emitted inner stream and
/// drops the previous inner subscription. Non-stream inner values are
/// wrapped as single-value streams. Completes when the outer stream and
/// the current inner stream have both completed.
pub fn flatten_latest(source: Stream) -> Stream {
    Stream::new(move |down| {
        let sub = Subscription::new();
        let state = Rc::new(RefCell::new(SwitchState {
            inner: None,
            generation: 0,
            inner_active: false,
            outer_done: false,
        }));

        let st = state.clone();
        let d = down.clone();
        let owner = sub.clone();
        let outer = source.subscribe(Observer::new(move |event| match event {
            Event::Next(v) => {
                let inner_stream = v.into_stream();
                let (previous, generation) = {
                    let mut s = st.borrow_mut();
                    s.generation += 1;
                    s.inner_active = true;
                    (s.inner.take(), s.generation)
                };
                if let Some(previous) = previous {
                    previous.unsubscribe();
                }

                let st_inner = st.clone();
                let d_inner = d.clone();
                let owner_inner = owner.clone();
                let inner_sub = inner_stream.subscribe(Observer::new(move |event| {
                    if st_inner.borrow().generation != generation {
                        return;
                    }
                    match event {
                        Event::Next(v) => d_inner.next(v),
                        Event::Error(e) => {
                            d_inner.error(e);
                            owner_inner.unsubscribe();
                        }
                        Event::Complete => {
                            let finished = {
                                let mut s = st_inner.borrow_mut();
                                s.inner_active = false;
                                s.outer_done
                            };
                            if finished {
                                d_inner.complete();
                                owner_inner.unsubscribe();
                            }
                        }
                    }
                }));

                let stale = {
                    let mut s = st.borrow_mut();
                    if s.generation == generation && !owner.is_closed() {
                        s.inner = Some(inner_sub.clone());
                        false
                    } else {
                        true
                    }
                };
                if stale {
                    inner_sub.unsubscribe();
                }
            }
            Event::Error(e) => {
                d.error(e);
                owner.unsubscribe();
            }
            Event::Complete => {
                let finished = {
                    let mut s = st.borrow_mut();
                    s.outer_done = true;
                    !s.inner_active
                };
                if finished {
                    d.complete();
                    owner.unsubscribe();
                }
            }
        }));
        sub.add_child(outer);
        sub.add(move || {
            let inner = state.borrow_mut().inner.take();
            if let Some(inner) = inner {
                inner.unsubscribe();
            }
        });
        sub
    })
}

/// Emits `null` right after subscribing unless the source emitted a
/// value before its `subscribe` returned; then passes everything through.
/// A source that completes during `subscribe` gets no default.
pub fn default_until_first(source: Stream) -> Stream {
    Stream::new(move |down| {
        let emitted = Rc::new(Cell::new(false));
        let seen = emitted.clone();
        let d = down.clone();
        let upstream = source.subscribe(Observer::new(move |event| {
            if matches!(event, Event::Next(_)) {
                seen.set(true);
            }
            d.emit(event);
        }));
        if !emitted.get() && !down.is_stopped() {
            down.next(Value::Null);
        }
        upstream
    })
}

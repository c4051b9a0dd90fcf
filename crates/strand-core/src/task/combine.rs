//! `combine`: join two tasks into one.

use std::sync::{Arc, Mutex, PoisonError};

use super::ComposableTask;
use super::cell::{Completer, Outcome, guarded};
use crate::domain::{Side, TaskError};

/// Results collected from both sides. The combining function and the
/// downstream completer are taken by whichever arrival resolves the join.
struct Join<T, U, V, F>
where
    V: Clone + Send + 'static,
{
    left: Option<Outcome<T>>,
    right: Option<Outcome<U>>,
    finish: Option<(F, Completer<V>)>,
}

/// What a resolved join produces.
enum Ready<T, U> {
    Fail(TaskError),
    Both(T, U),
}

impl<T, U, V, F> Join<T, U, V, F>
where
    V: Clone + Send + 'static,
{
    /// Resolution rules:
    /// - a left failure resolves at once, whatever the right side is doing;
    /// - a right failure resolves once the left side is in, so a left
    ///   failure still wins when both fail;
    /// - two successes resolve to `Both`.
    fn ready(&mut self) -> Option<Ready<T, U>> {
        let ready = match (self.left.take(), self.right.take()) {
            (Some(Err(err)), _) => Ready::Fail(TaskError::Combine {
                side: Side::Left,
                source: Box::new(err),
            }),
            (Some(Ok(_)), Some(Err(err))) => Ready::Fail(TaskError::Combine {
                side: Side::Right,
                source: Box::new(err),
            }),
            (Some(Ok(a)), Some(Ok(b))) => Ready::Both(a, b),
            (left, right) => {
                self.left = left;
                self.right = right;
                return None;
            }
        };
        Some(ready)
    }
}

/// Record one side's outcome and resolve the join if that settles it.
/// Arrivals after resolution are discarded.
fn arrive<T, U, V, F>(join: &Mutex<Join<T, U, V, F>>, record: impl FnOnce(&mut Join<T, U, V, F>))
where
    V: Clone + Send + 'static,
    F: FnOnce(T, U) -> V,
{
    let resolved = {
        let mut join = join.lock().unwrap_or_else(PoisonError::into_inner);
        if join.finish.is_none() {
            return;
        }
        record(&mut *join);
        match join.ready() {
            Some(ready) => join.finish.take().map(|finish| (ready, finish)),
            None => None,
        }
    };

    if let Some((ready, (f, completer))) = resolved {
        let outcome = match ready {
            Ready::Fail(err) => Err(err),
            Ready::Both(a, b) => guarded(move || f(a, b)),
        };
        completer.complete(outcome);
    }
}

pub(super) fn combine<T, U, V, F>(
    left: &ComposableTask<T>,
    right: &ComposableTask<U>,
    f: F,
) -> ComposableTask<V>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    V: Clone + Send + 'static,
    F: FnOnce(T, U) -> V + Send + 'static,
{
    let (task, completer) = left.derive::<V>();
    let join = Arc::new(Mutex::new(Join {
        left: None,
        right: None,
        finish: Some((f, completer)),
    }));

    let on_left = Arc::clone(&join);
    left.cell.register(Box::new(move |outcome| {
        arrive(&on_left, move |join| join.left = Some(outcome));
    }));

    let on_right = join;
    right.cell.register(Box::new(move |outcome| {
        arrive(&on_right, move |join| join.right = Some(outcome));
    }));

    task
}

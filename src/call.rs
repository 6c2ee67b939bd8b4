use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::trace;

use crate::types::Outcome;

pub(crate) type Sink<V, E> = oneshot::Sender<Outcome<V, E>>;

#[derive(Debug)]
enum Status<V, E> {
    Starting,
    LeaderDrop,
    Done(Result<V, E>),
}

pub(crate) struct State<V, E> {
    status: Status<V, E>,
    // callers beyond the leader, frozen once the status leaves Starting
    dups: usize,
    chans: Vec<Sink<V, E>>,
}

/// Call is an in-flight or completed flight for a single key.
///
/// The group lock is always taken before the state lock, so a caller holding
/// both sees a consistent registry and record.
pub(crate) struct Call<V, E> {
    cvar: Condvar,
    state: Mutex<State<V, E>>,
}

impl<V, E> Call<V, E> {
    pub(crate) fn new(sink: Option<Sink<V, E>>) -> Self {
        Self {
            cvar: Condvar::new(),
            state: Mutex::new(State {
                status: Status::Starting,
                dups: 0,
                chans: sink.into_iter().collect(),
            }),
        }
    }

    pub(crate) fn dups(&self) -> usize {
        self.state.lock().dups
    }

    /// join counts one more blocking waiter and hands back the locked state,
    /// so no completion can slip in before the caller starts waiting.
    pub(crate) fn join(&self) -> MutexGuard<'_, State<V, E>> {
        let mut state = self.state.lock();
        state.dups += 1;
        state
    }

    /// subscribe counts one more waiter that gets the outcome through `sink`.
    pub(crate) fn subscribe(&self, sink: Sink<V, E>) {
        let mut state = self.state.lock();
        state.dups += 1;
        state.chans.push(sink);
    }

    /// abandon settles the call without a result. Dropping the sinks closes
    /// every subscriber and blocking waiters wake up to retry.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        state.status = Status::LeaderDrop;
        state.chans.clear();
        self.cvar.notify_all();
    }
}

impl<V: Clone, E: Clone> Call<V, E> {
    /// wait blocks until the leader settles the call.
    /// Returns `None` if the leader dropped without a result.
    pub(crate) fn wait(&self, mut state: MutexGuard<'_, State<V, E>>) -> Option<Result<V, E>> {
        loop {
            match state.status {
                Status::Starting => {
                    trace!("Not return, waiting...");
                    self.cvar.wait(&mut state);
                    trace!("Work done noticed");
                }
                Status::LeaderDrop => return None,
                Status::Done(ref result) => return Some(result.clone()),
            }
        }
    }

    /// complete stores the result, wakes the blocking waiters and delivers
    /// to every subscriber. The returned outcome is the leader's.
    pub(crate) fn complete(&self, result: Result<V, E>) -> Outcome<V, E> {
        let mut state = self.state.lock();
        let outcome = Outcome {
            result,
            shared: state.dups > 0,
        };
        state.status = Status::Done(outcome.result.clone());
        self.cvar.notify_all();
        for sink in state.chans.drain(..) {
            // receiver already gone
            let _ = sink.send(outcome.clone());
        }
        trace!(shared = outcome.shared, "Call completed");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::Call;
    use tokio::sync::oneshot;

    #[test]
    fn test_complete_delivers_to_subscribers() {
        let call: Call<i32, String> = Call::new(None);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        call.subscribe(tx1);
        call.subscribe(tx2);
        assert_eq!(call.dups(), 2);

        let outcome = call.complete(Ok(3));
        assert!(outcome.shared);
        assert_eq!(rx1.try_recv().unwrap(), outcome);
        assert_eq!(rx2.try_recv().unwrap(), outcome);
    }

    #[test]
    fn test_unshared_completion() {
        let call: Call<i32, String> = Call::new(None);
        let outcome = call.complete(Err("boom".to_owned()));
        assert!(!outcome.shared);
        assert_eq!(outcome.result, Err("boom".to_owned()));
        let state = call.join();
        assert_eq!(call.wait(state), Some(Err("boom".to_owned())));
    }

    #[test]
    fn test_abandon_closes_sinks() {
        let (tx, mut rx) = oneshot::channel();
        let call: Call<i32, String> = Call::new(Some(tx));
        call.abandon();
        assert!(rx.try_recv().is_err());
        let state = call.join();
        assert_eq!(call.wait(state), None);
    }
}

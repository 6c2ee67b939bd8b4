use core::borrow::Borrow;
use core::fmt;
use core::future::Future;
use core::hash::Hash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use threadpool::ThreadPool;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, trace, Span};

use crate::call::{Call, Sink};
use crate::receiver::Receiver;
use crate::types::{Options, Outcome, SharedError};

type Calls<K, V, E> = HashMap<K, Arc<Call<V, E>>>;

/// Group represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// Clones share the same registry, so a group can be handed to other threads
/// or tasks freely.
pub struct Group<K, V, E = SharedError> {
    calls: Arc<Mutex<Calls<K, V, E>>>,
    pool: Arc<Mutex<Option<ThreadPool>>>,
    options: Arc<Options>,
}

impl<K, V, E> Clone for Group<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
            pool: self.pool.clone(),
            options: self.options.clone(),
        }
    }
}

impl<K, V, E> fmt::Debug for Group<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.options.name)
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

impl<K, V, E> Default for Group<K, V, E> {
    fn default() -> Self {
        Self::with_options(Options::default())
    }
}

impl<K, V, E> Group<K, V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            pool: Arc::new(Mutex::new(None)),
            options: Arc::new(options),
        }
    }

    /// options returns the options the group was built with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// in_flight returns how many keys currently have a running flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let mut pool = self.pool.lock();
        let pool = pool.get_or_insert_with(|| {
            trace!(workers = self.options.workers, "Starting worker pool");
            threadpool::Builder::new()
                .num_threads(self.options.workers.max(1))
                .thread_name(format!("{}-worker", self.options.name))
                .build()
        });
        // a flight never waits for a worker: long or interdependent works
        // would otherwise starve every key queued behind them
        let busy = pool.active_count() + pool.queued_count();
        if busy >= pool.max_count() {
            trace!(workers = busy + 1, "Growing worker pool");
            pool.set_num_threads(busy + 1);
        }
        pool.execute(job);
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq,
{
    /// forget_unshared tells the group to forget about a key if it is not
    /// shared with any other caller. Future calls for a forgotten key run
    /// their work rather than waiting for the earlier flight to complete.
    ///
    /// Returns whether the key was forgotten or unknown, that is whether no
    /// other caller is waiting for its result.
    #[instrument(skip_all, fields(group = %self.options.name))]
    pub fn forget_unshared<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut calls = self.calls.lock();
        match calls.get(key).map(|call| call.dups()) {
            None => true,
            Some(0) => {
                calls.remove(key);
                trace!("Entry forgotten");
                true
            }
            Some(dups) => {
                trace!(dups, "Entry shared, kept");
                false
            }
        }
    }

    /// duplicates returns how many callers joined the flight for `key`,
    /// or `None` when nothing is in flight for it.
    pub fn duplicates<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.calls.lock().get(key).map(|call| call.dups())
    }

    /// remove drops `key` from the registry if it still points at `call`;
    /// a forget followed by a fresh flight may have replaced it.
    fn remove(calls: &mut Calls<K, V, E>, key: &K, call: &Arc<Call<V, E>>) {
        if calls.get(key).is_some_and(|c| Arc::ptr_eq(c, call)) {
            calls.remove(key);
            trace!("Entry removed");
        }
    }

    fn abandon(&self, key: &K, call: &Arc<Call<V, E>>) {
        let mut calls = self.calls.lock();
        call.abandon();
        Self::remove(&mut calls, key, call);
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    /// lead registers a fresh flight for `key`. The caller must already hold
    /// the registry lock and must settle the returned leader.
    fn lead(&self, calls: &mut Calls<K, V, E>, key: K, sink: Option<Sink<V, E>>) -> Leader<K, V, E> {
        let call = Arc::new(Call::new(sink));
        calls.insert(key.clone(), call.clone());
        trace!("Entry inited");
        Leader {
            group: self.clone(),
            key,
            call,
            settled: false,
        }
    }

    fn finish(&self, key: &K, call: &Arc<Call<V, E>>, result: Result<V, E>) -> Outcome<V, E> {
        let mut calls = self.calls.lock();
        let outcome = call.complete(result);
        Self::remove(&mut calls, key, call);
        outcome
    }

    /// do_work executes and returns the results of the given function, making
    /// sure that only one execution is in-flight for a given key at a
    /// time. If a duplicate comes in, the duplicate caller waits for the
    /// original to complete and receives the same results.
    ///
    /// `work` runs on the calling thread and receives `token`; it is up to
    /// the work to honor it, the group never interrupts a flight.
    ///
    /// If the leader panics, the flight is handed to one of the waiters, which
    /// runs its own `work`. The work for a key can therefore execute more than
    /// once for a single burst of callers when a leader panics.
    #[instrument(skip_all, fields(group = %self.options.name))]
    pub fn do_work<F>(&self, token: CancellationToken, key: K, work: F) -> Outcome<V, E>
    where
        F: FnOnce(CancellationToken) -> Result<V, E>,
    {
        loop {
            let mut calls = self.calls.lock();
            trace!("Aquire lock");
            let existing = calls.get(&key).cloned();
            if let Some(call) = existing {
                let state = call.join();
                drop(calls);
                match call.wait(state) {
                    Some(result) => {
                        trace!("Value returned");
                        return Outcome {
                            result,
                            shared: true,
                        };
                    }
                    None => {
                        trace!("Leader dropped, retrying");
                        continue;
                    }
                }
            }
            let leader = self.lead(&mut calls, key, None);
            drop(calls);

            trace!("working...");
            let result = work(token);
            trace!("Work done");
            return leader.finish(result);
        }
    }

    /// work is like do_work for async code. The leader awaits its future in
    /// place; duplicates await the leader's outcome without blocking a thread.
    ///
    /// Dropping the leader's future (or a panic in it) abandons the flight,
    /// and one of the waiters takes over by running its own `work`. The work
    /// for a key can therefore execute more than once for a single burst of
    /// callers.
    #[instrument(skip_all, fields(group = %self.options.name))]
    pub async fn work<F, Fut>(&self, token: CancellationToken, key: K, work: F) -> Outcome<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            let (tx, rx) = oneshot::channel();
            let leader = {
                let mut calls = self.calls.lock();
                trace!("Aquire lock");
                let existing = calls.get(&key).cloned();
                match existing {
                    Some(call) => {
                        call.subscribe(tx);
                        None
                    }
                    None => Some(self.lead(&mut calls, key.clone(), None)),
                }
            };

            match leader {
                Some(leader) => {
                    trace!("working...");
                    let result = work(token).await;
                    trace!("Work done");
                    return leader.finish(result);
                }
                None => match Receiver::new(rx).await {
                    Ok(outcome) => {
                        trace!("Value returned");
                        return outcome;
                    }
                    Err(_) => {
                        trace!("Leader dropped, retrying");
                        continue;
                    }
                },
            }
        }
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// do_chan is like do_work but returns a receiver that will get the
    /// results when they are ready. It never blocks: the leader's work runs
    /// on the group's worker pool.
    ///
    /// If the leader panics the receivers report [`Error::Abandoned`].
    ///
    /// [`Error::Abandoned`]: crate::Error::Abandoned
    #[instrument(skip_all, fields(group = %self.options.name))]
    pub fn do_chan<F>(&self, token: CancellationToken, key: K, work: F) -> Receiver<V, E>
    where
        F: FnOnce(CancellationToken) -> Result<V, E> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut calls = self.calls.lock();
        trace!("Aquire lock");
        if let Some(call) = calls.get(&key) {
            call.subscribe(tx);
            trace!("Subscribed");
            return Receiver::new(rx);
        }
        let leader = self.lead(&mut calls, key, Some(tx));
        drop(calls);

        let span = Span::current();
        self.spawn(move || {
            let _enter = span.enter();
            trace!("working...");
            let result = work(token);
            trace!("Work done");
            leader.finish(result);
        });
        Receiver::new(rx)
    }
}

/// Leader is the right, and the duty, to settle one flight.
///
/// A leader dropped without `finish` (a panic, a cancelled future) abandons
/// its flight so waiters are never left hanging.
struct Leader<K, V, E>
where
    K: Hash + Eq,
{
    group: Group<K, V, E>,
    key: K,
    call: Arc<Call<V, E>>,
    settled: bool,
}

impl<K, V, E> Leader<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn finish(mut self, result: Result<V, E>) -> Outcome<V, E> {
        self.settled = true;
        self.group.finish(&self.key, &self.call, result)
    }
}

impl<K, V, E> Drop for Leader<K, V, E>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        if !self.settled {
            error!("Leader dropped before the work completed");
            self.group.abandon(&self.key, &self.call);
        }
    }
}

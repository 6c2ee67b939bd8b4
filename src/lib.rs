//! Duplicate function call suppression.
//!
//! A [`Group`] makes sure that only one execution of a piece of work is in
//! flight for a given key at a time. Callers that come in while the work is
//! running wait for it and receive the same result.
//!
//! ```
//! use singleflight::Group;
//! use tokio_util::sync::CancellationToken;
//!
//! let group: Group<&str, String> = Group::new();
//! let outcome = group.do_work(CancellationToken::new(), "key", |_| Ok("bar".to_owned()));
//! assert_eq!(outcome.result.unwrap(), "bar");
//! assert!(!outcome.shared);
//! ```
//!
//! Three ways of joining a flight are offered:
//!
//! * [`Group::do_work`] runs the work on the calling thread, or blocks until
//!   the running flight completes.
//! * [`Group::do_chan`] never blocks; the outcome is delivered through a
//!   [`Receiver`] and the work runs on the group's worker pool.
//! * [`Group::work`] is the async counterpart of `do_work`.
//!
//! Results are not cached: once a flight completes its key is forgotten and
//! the next caller runs the work again. [`Group::forget_unshared`] lets a
//! caller drop a flight early, as long as nobody else has joined it.
mod call;
mod error;
mod group;
mod receiver;
mod types;

pub use error::Error;
pub use group::Group;
pub use receiver::Receiver;
pub use types::{Options, Outcome, SharedError};

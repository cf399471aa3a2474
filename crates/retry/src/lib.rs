//! Retry engine with named exponential-backoff policies.
//!
//! Operations report whether a failure is worth another attempt through the
//! [`Retryable`] trait; the [`Retrier`] sleeps between attempts according to
//! a [`RetryPolicy`] and gives up with a [`RetryError`] that carries the
//! attempt count and the last cause.

mod error;
mod policy;
mod retrier;

pub use error::{RetryError, Retryable};
pub use policy::RetryPolicy;
pub use retrier::{Attempted, RetryContext, Retrier};

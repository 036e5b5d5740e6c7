//! Deadline-bearing execution scope for database round-trips.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use chmacro::scope::Scope;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scope = Scope::with_timeout(Duration::from_secs(1));
//! let value = scope.run(async { Ok(42) }).await.unwrap();
//! assert_eq!(value, 42);
//! # }
//! ```

use std::{future::Future, time::Duration};

use tokio::time::{Instant, timeout_at};

use crate::error::{AppResult, deadline_error};

/// Optional deadline shared by every lookup of one interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope {
    deadline: Option<Instant>
}

impl Scope {
    /// Scope without a deadline
    pub fn unbounded() -> Self {
        Self {
            deadline: None
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout)
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline)
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<T, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>
    {
        match self.deadline {
            None => fut.await,
            Some(_) if self.is_expired() => Err(deadline_error()),
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .map_err(|_| deadline_error())?
        }
    }
}

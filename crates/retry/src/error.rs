/// Classifies a failure as worth another attempt or not.
pub trait Retryable {
    /// `false` stops the retry loop immediately.
    fn is_retryable(&self) -> bool;
}

/// Terminal outcome of a retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("{operation} failed with a non-retryable error on attempt {attempts}: {source}")]
    Aborted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("{operation} interrupted while waiting after attempt {attempts}")]
    Interrupted { operation: String, attempts: u32 },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. }
            | Self::Interrupted { attempts, .. } => *attempts,
        }
    }

    /// The last cause, if an attempt actually failed.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::Aborted { source, .. } => Some(source),
            Self::Interrupted { .. } => None,
        }
    }
}

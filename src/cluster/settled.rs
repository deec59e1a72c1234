use std::future::Future;

use futures::future::join_all;

/// Outcome of a batch where every call is allowed to fail on its own.
/// Both lists keep the order the calls were issued in.
#[derive(Debug)]
pub struct Settled<T, E> {
    pub succeeded: Vec<T>,
    pub failed: Vec<E>,
}

impl<T, E> Default for Settled<T, E> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T, E> FromIterator<Result<T, E>> for Settled<T, E> {
    fn from_iter<I: IntoIterator<Item = Result<T, E>>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::default(), |mut settled, result| {
                match result {
                    Ok(v) => settled.succeeded.push(v),
                    Err(e) => settled.failed.push(e),
                }
                settled
            })
    }
}

impl<T, E> Settled<T, E> {
    pub fn is_total_failure(&self) -> bool {
        self.succeeded.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// Runs all futures concurrently and waits for every one of them.
pub async fn settle_all<I, F, T, E>(futures: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures).await.into_iter().collect()
}

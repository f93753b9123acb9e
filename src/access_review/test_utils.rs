#[cfg(test)]
use super::{AccessQuery, AccessReviewer, ReviewError, Verdict};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// An authorization service double answering every query from a closure.
#[cfg(test)]
pub struct StaticReviewer {
    respond: Box<dyn Fn(&AccessQuery) -> Result<Verdict, ReviewError> + Send + Sync>,
    calls: AtomicUsize,
}

#[cfg(test)]
impl StaticReviewer {
    pub fn new(
        respond: impl Fn(&AccessQuery) -> Result<Verdict, ReviewError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn deny_all() -> Self {
        Self::new(|_| Ok(Verdict::deny()))
    }

    pub fn allow_all() -> Self {
        Self::new(|_| Ok(Verdict::allow()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl AccessReviewer for StaticReviewer {
    async fn review(&self, query: &AccessQuery) -> Result<Verdict, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(query)
    }
}

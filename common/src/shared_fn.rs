use std::fmt;
use std::sync::Arc;

/// Optional shared callback. Cheap to clone, callable from any thread.
pub struct SharedFn<F: ?Sized + Send + Sync + 'static>(Option<Arc<F>>);

impl<F: ?Sized + Send + Sync + 'static> SharedFn<F> {
    pub fn new(f: Arc<F>) -> Self {
        Self(Some(f))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<&F> {
        self.0.as_deref()
    }
}

impl<F: ?Sized + Send + Sync + 'static> Clone for SharedFn<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<F: ?Sized + Send + Sync + 'static> Default for SharedFn<F> {
    fn default() -> Self {
        Self::none()
    }
}

impl<F: ?Sized + Send + Sync + 'static> From<Arc<F>> for SharedFn<F> {
    fn from(f: Arc<F>) -> Self {
        Self::new(f)
    }
}

impl<F: ?Sized + Send + Sync + 'static> fmt::Debug for SharedFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "SharedFn(Some(..))"),
            None => write!(f, "SharedFn(None)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_none_has_no_callback() {
        let f: SharedFn<dyn Fn(usize) + Send + Sync> = SharedFn::default();
        assert!(!f.is_some());
        assert!(f.get().is_none());
    }

    #[test]
    fn test_clones_share_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let f: SharedFn<dyn Fn(usize) + Send + Sync> = SharedFn::new(Arc::new(move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        }));
        let g = f.clone();
        (f.get().unwrap())(2);
        (g.get().unwrap())(3);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }
}

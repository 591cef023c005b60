use std::sync::Arc;

use tokio::sync::watch;

/// Latest-value state holder shared between a view-model and its UI.
#[derive(Debug)]
pub struct Observable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { tx: Arc::clone(&self.tx) }
    }
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self { tx: Arc::new(watch::channel(initial).0) }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place and wake every subscriber.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

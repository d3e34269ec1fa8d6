// SPDX-License-Identifier: GPL-3.0-only

//! Listener registration and isolated dispatch
//!
//! Listener sets are copy-on-write: notification iterates over a snapshot,
//! so listeners may be added or removed concurrently, even from inside a
//! callback. Each callback runs on its own; an error or a panic is logged and
//! the remaining listeners are still called.

use super::camera::Camera;
use crate::backends::camera::Frame;
use crate::errors::ListenerResult;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Copy-on-write set of listeners
pub struct ListenerSet<T: ?Sized> {
    inner: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; returns false if this exact instance is already present
    pub fn add(&self, listener: Arc<T>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|l| Arc::ptr_eq(l, listener)) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    /// Current listeners, safe to iterate while the set changes
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `notify` for every listener, isolating failures
    ///
    /// `what` names the notification in the log when a listener fails.
    pub fn dispatch<F>(&self, what: &str, mut notify: F)
    where
        F: FnMut(&T) -> ListenerResult,
    {
        for listener in self.snapshot().iter() {
            match catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(notification = %what, error = %e, "Listener returned an error");
                }
                Err(panic) => {
                    error!(
                        notification = %what,
                        panic = %panic_message(panic.as_ref()),
                        "Listener panicked"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Kind of camera event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEventKind {
    Open,
    Closed,
    Disposed,
    NewImage,
}

/// Event delivered to camera listeners
#[derive(Clone)]
pub struct CameraEvent {
    pub kind: CameraEventKind,
    pub camera: Camera,
    /// Set for image events
    pub frame: Option<Frame>,
}

impl std::fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraEvent")
            .field("kind", &self.kind)
            .field("camera", &self.camera.name())
            .field("frame", &self.frame.as_ref().map(|fr| fr.size()))
            .finish()
    }
}

/// Camera lifecycle and image listener
///
/// All methods default to doing nothing.
pub trait CameraListener: Send + Sync {
    fn on_open(&self, _event: &CameraEvent) -> ListenerResult {
        Ok(())
    }

    fn on_close(&self, _event: &CameraEvent) -> ListenerResult {
        Ok(())
    }

    fn on_disposed(&self, _event: &CameraEvent) -> ListenerResult {
        Ok(())
    }

    /// Called on the camera's notification thread
    fn on_image_obtained(&self, _event: &CameraEvent) -> ListenerResult {
        Ok(())
    }
}

/// Kind of discovery event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEventKind {
    Added,
    Removed,
}

/// Event delivered to discovery listeners
#[derive(Clone)]
pub struct DiscoveryEvent {
    pub kind: DiscoveryEventKind,
    pub camera: Camera,
}

/// Device arrival and removal listener
pub trait DiscoveryListener: Send + Sync {
    fn on_camera_found(&self, _event: &DiscoveryEvent) -> ListenerResult {
        Ok(())
    }

    fn on_camera_gone(&self, _event: &DiscoveryEvent) -> ListenerResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Probe: Send + Sync {
        fn hit(&self) -> ListenerResult;
    }

    struct Counting(AtomicUsize);

    impl Probe for Counting {
        fn hit(&self) -> ListenerResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Probe for Failing {
        fn hit(&self) -> ListenerResult {
            Err("listener failure".into())
        }
    }

    struct Panicking;

    impl Probe for Panicking {
        fn hit(&self) -> ListenerResult {
            panic!("listener panic");
        }
    }

    #[test]
    fn test_add_remove() {
        let set: ListenerSet<dyn Probe> = ListenerSet::new();
        let a: Arc<dyn Probe> = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(set.add(Arc::clone(&a)));
        assert!(!set.add(Arc::clone(&a)));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert!(set.is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_dispatch() {
        let set: ListenerSet<dyn Probe> = ListenerSet::new();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        set.add(Arc::new(Failing));
        set.add(Arc::new(Panicking));
        set.add(counter.clone());

        set.dispatch("hit", |l| l.hit());
        set.dispatch("hit", |l| l.hit());

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_changes() {
        let set: ListenerSet<dyn Probe> = ListenerSet::new();
        set.add(Arc::new(Failing));
        let snapshot = set.snapshot();
        set.add(Arc::new(Failing));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.len(), 2);
    }
}

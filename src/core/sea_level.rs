//! Process-wide sea level with change broadcast
//!
//! Sea level is owned here and nowhere else. Consumers hold a cloned
//! [`SeaLevelState`] handle and either read the live value, poll a
//! [`SeaLevelWatcher`] for changes on their own thread, or register an
//! `on_change` listener that runs synchronously inside `set_sea_level`.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::core::config::ElevationRange;

/// Sea level in both representations. `meters == range.to_meters(normalized)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeaLevel {
    pub normalized: f32,
    pub meters: f32,
}

type Listener = Arc<dyn Fn(SeaLevel) + Send + Sync>;

struct Inner {
    range: ElevationRange,
    sender: watch::Sender<SeaLevel>,
    listeners: Mutex<Vec<Listener>>,
}

/// Shared handle to the single sea level value.
#[derive(Clone)]
pub struct SeaLevelState {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SeaLevelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaLevelState")
            .field("range", &self.inner.range)
            .field("level", &self.get())
            .finish()
    }
}

impl SeaLevelState {
    /// Create with an initial normalized level (clamped to `[0, 1]`).
    pub fn new(range: ElevationRange, normalized: f32) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        let level = SeaLevel {
            normalized,
            meters: range.to_meters(normalized),
        };
        let (sender, _) = watch::channel(level);
        Self {
            inner: Arc::new(Inner {
                range,
                sender,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create with sea level at 0 m in `range` (clamped into the range).
    pub fn at_datum(range: ElevationRange) -> Self {
        Self::new(range, range.to_normalized(0.0))
    }

    pub fn range(&self) -> ElevationRange {
        self.inner.range
    }

    pub fn get(&self) -> SeaLevel {
        *self.inner.sender.borrow()
    }

    pub fn get_sea_level_meters(&self) -> f32 {
        self.get().meters
    }

    pub fn get_sea_level_normalized(&self) -> f32 {
        self.get().normalized
    }

    /// Set the level from a normalized value and notify every consumer.
    ///
    /// Setting the current value again is a no-op and notifies nobody.
    pub fn set_sea_level(&self, normalized: f32) -> SeaLevel {
        let normalized = normalized.clamp(0.0, 1.0);
        let level = SeaLevel {
            normalized,
            meters: self.inner.range.to_meters(normalized),
        };
        if self.get() == level {
            return level;
        }

        self.inner.sender.send_replace(level);
        log::info!("Sea level set to {:.1} m (normalized {:.4})", level.meters, level.normalized);

        // Call listeners outside the lock so they may read the state again.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener(level);
        }
        level
    }

    /// Set the level in meters.
    pub fn set_sea_level_meters(&self, meters: f32) -> SeaLevel {
        self.set_sea_level(self.inner.range.to_normalized(meters))
    }

    /// Register a watcher whose change flag is raised by every `set_sea_level`.
    pub fn subscribe(&self) -> SeaLevelWatcher {
        SeaLevelWatcher {
            rx: self.inner.sender.subscribe(),
        }
    }

    /// Register a listener called synchronously on every change.
    pub fn on_change(&self, listener: impl Fn(SeaLevel) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }
}

/// Change-tracking view of the sea level for one consumer.
pub struct SeaLevelWatcher {
    rx: watch::Receiver<SeaLevel>,
}

impl SeaLevelWatcher {
    /// Latest level if it changed since the last call, marking it seen.
    pub fn take_change(&mut self) -> Option<SeaLevel> {
        match self.rx.has_changed() {
            Ok(true) => Some(*self.rx.borrow_and_update()),
            _ => None,
        }
    }

    /// Current level without touching the change flag.
    pub fn current(&self) -> SeaLevel {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_meters_follow_normalized() {
        let range = ElevationRange::new(-1000.0, 1000.0);
        let state = SeaLevelState::new(range, 0.5);
        assert_eq!(state.get_sea_level_meters(), 0.0);

        state.set_sea_level(0.75);
        assert_eq!(state.get_sea_level_meters(), 500.0);
        assert_eq!(state.get_sea_level_normalized(), 0.75);
    }

    #[test]
    fn test_set_meters() {
        let state = SeaLevelState::at_datum(ElevationRange::new(-1000.0, 1000.0));
        state.set_sea_level_meters(100.0);
        assert!((state.get_sea_level_meters() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_clamped_to_range() {
        let state = SeaLevelState::new(ElevationRange::new(0.0, 10.0), 2.0);
        assert_eq!(state.get_sea_level_normalized(), 1.0);
        state.set_sea_level(-3.0);
        assert_eq!(state.get_sea_level_meters(), 0.0);
    }

    #[test]
    fn test_watcher_sees_each_change_once() {
        let state = SeaLevelState::at_datum(ElevationRange::planetary());
        let mut watcher = state.subscribe();
        assert!(watcher.take_change().is_none());

        state.set_sea_level_meters(50.0);
        let change = watcher.take_change().unwrap();
        assert!((change.meters - 50.0).abs() < 1e-2);
        assert!(watcher.take_change().is_none());
    }

    #[test]
    fn test_listeners_notified_on_change_only() {
        let state = SeaLevelState::new(ElevationRange::new(0.0, 1.0), 0.5);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        state.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        state.set_sea_level(0.6);
        state.set_sea_level(0.6);
        state.set_sea_level(0.7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let state = SeaLevelState::at_datum(ElevationRange::planetary());
        let other = state.clone();
        other.set_sea_level(0.9);
        assert_eq!(state.get_sea_level_normalized(), 0.9);
    }
}

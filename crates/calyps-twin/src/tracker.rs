//! [`TwinTracker`] – the shared, clonable handle through which discovery,
//! live events and command dispatch update twins.
//!
//! The registry sits behind one [`std::sync::Mutex`] that is only held for
//! synchronous updates, never across an `.await`, so one mutation completes
//! before the next begins no matter which task issues it.
//!
//! Motion is only ever written by [`TwinTracker::render`].  Each render bumps
//! the twin's motion generation and aborts the previous revert timer; a
//! moving verdict arms a new one that puts the twin back to
//! [`MotionState::Stopped`] after the revert delay, unless a later render
//! has happened in the meantime.
//!
//! Snapshots are published on the [`ChangeBus`] before the lock is released,
//! so subscribers see changes in the order they were made.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use calyps_link::{ChangeBus, InventoryRecord, LevelEvent};
use calyps_types::{CalypsError, Level, MotionState, TwinChange};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time;
use tracing::{debug, trace};

use crate::motion::{MOTION_REVERT_DELAY, infer};
use crate::registry::{DeviceRegistry, Upsert};
use crate::twin::DeviceTwin;

#[derive(Debug, Clone)]
pub struct TwinTracker {
    registry: Arc<Mutex<DeviceRegistry>>,
    bus: ChangeBus,
    revert_delay: Duration,
}

impl Default for TwinTracker {
    fn default() -> Self {
        Self::new(ChangeBus::default(), MOTION_REVERT_DELAY)
    }
}

impl TwinTracker {
    pub fn new(bus: ChangeBus, revert_delay: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(DeviceRegistry::new())),
            bus,
            revert_delay,
        }
    }

    pub fn revert_delay(&self) -> Duration {
        self.revert_delay
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TwinChange> {
        self.bus.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render the motion state of `identity` from
    /// `(previous target, observed actual, next target)`.
    ///
    /// A stopped verdict corrects the target to `actual`.  Levels are
    /// otherwise left alone.
    ///
    /// Must be called from within a Tokio runtime, which hosts the revert
    /// timer.
    ///
    /// # Errors
    ///
    /// [`CalypsError::UnknownDevice`] when no twin has that identity.
    pub fn render(
        &self,
        identity: &str,
        previous: Level,
        actual: Level,
        next: Level,
    ) -> Result<MotionState, CalypsError> {
        let mut registry = self.lock();
        let twin = registry
            .get_mut(identity)
            .ok_or_else(|| CalypsError::UnknownDevice(identity.to_string()))?;
        self.render_twin(twin, previous, actual, next);
        let state = twin.motion;
        self.bus.publish(twin.snapshot());
        Ok(state)
    }

    fn render_twin(&self, twin: &mut DeviceTwin, previous: Level, actual: Level, next: Level) {
        let verdict = infer(previous, actual, next);
        if let Some(target) = verdict.corrected_target {
            twin.target_level = target;
        }
        twin.motion = verdict.state;
        twin.motion_generation = twin.motion_generation.wrapping_add(1);
        twin.cancel_revert();
        if verdict.state.is_moving() {
            twin.revert = Some(self.arm_revert(twin.identity.clone(), twin.motion_generation));
        }
        trace!(
            device = %twin.identity,
            %previous, %actual, %next,
            motion = %verdict.state,
            "rendered"
        );
    }

    fn arm_revert(&self, identity: String, generation: u64) -> AbortHandle {
        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        let delay = self.revert_delay;

        tokio::spawn(async move {
            time::sleep(delay).await;
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(twin) = registry.get_mut(&identity) else {
                return;
            };
            if twin.motion_generation != generation {
                return;
            }
            twin.motion = MotionState::Stopped;
            twin.revert = None;
            debug!(device = %identity, "no news from moving shutter, assuming stopped");
            bus.publish(twin.snapshot());
        })
        .abort_handle()
    }

    /// Reconcile inventory records: create unknown twins, refresh known ones
    /// and render each at its reported level.
    ///
    /// Returns `(created, updated)`.
    pub fn apply_inventory(&self, records: &[InventoryRecord]) -> (usize, usize) {
        let mut created = 0;
        let mut updated = 0;
        let mut registry = self.lock();
        for record in records {
            match registry.upsert(record) {
                Upsert::Created => created += 1,
                Upsert::Updated => updated += 1,
            }
            if let Some(twin) = registry.get_mut(&record.identity) {
                twin.current_level = record.level;
                self.render_twin(twin, record.level, record.level, record.level);
                self.bus.publish(twin.snapshot());
            }
        }
        (created, updated)
    }

    /// Apply a live level report.
    ///
    /// Returns `false`, leaving every twin untouched, when no twin reports
    /// under the event's key.
    pub fn apply_level_event(&self, event: &LevelEvent) -> bool {
        let mut registry = self.lock();
        let Some(twin) = registry.find_by_event_key_mut(&event.key) else {
            debug!(key = %event.key, level = %event.level, "level event for unknown device dropped");
            return false;
        };
        let previous = twin.current_level;
        self.render_twin(twin, previous, event.level, event.level);
        twin.current_level = event.level;
        self.bus.publish(twin.snapshot());
        true
    }

    /// Record a commanded level and predict the motion it starts.
    ///
    /// # Errors
    ///
    /// [`CalypsError::UnknownDevice`] when no twin has that identity.
    pub fn predict_level(&self, identity: &str, requested: Level) -> Result<MotionState, CalypsError> {
        let mut registry = self.lock();
        let twin = registry
            .get_mut(identity)
            .ok_or_else(|| CalypsError::UnknownDevice(identity.to_string()))?;
        let current = twin.current_level;
        twin.target_level = requested;
        self.render_twin(twin, current, current, requested);
        let state = twin.motion;
        self.bus.publish(twin.snapshot());
        Ok(state)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().get(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self, identity: &str) -> Option<TwinChange> {
        self.lock().get(identity).map(DeviceTwin::snapshot)
    }

    /// Snapshots of every twin, sorted by identity.
    pub fn snapshots(&self) -> Vec<TwinChange> {
        self.lock()
            .iter_sorted()
            .into_iter()
            .map(DeviceTwin::snapshot)
            .collect()
    }

    /// `true` while `identity` has an armed revert timer.
    pub fn has_pending_revert(&self, identity: &str) -> bool {
        self.lock()
            .get(identity)
            .is_some_and(DeviceTwin::has_pending_revert)
    }
}

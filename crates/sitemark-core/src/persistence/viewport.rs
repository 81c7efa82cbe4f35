//! Debounced viewport persistence.
//!
//! Pan and zoom fire on every animation frame; the saver coalesces them and
//! writes only after the view has been still for the debounce interval.

use super::{PersistResult, Persistence};
use crate::geometry::{Context, GeoPoint};
use crate::model::ProjectId;
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Default quiet period before a viewport write, in milliseconds.
pub const DEFAULT_VIEWPORT_DEBOUNCE_MS: u64 = 1000;

/// Center and zoom of a view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub context: Context,
    pub center: GeoPoint,
    pub zoom: f64,
}

/// Coalesces viewport changes into one write per quiet period.
#[derive(Debug, Clone)]
pub struct ViewportSaver {
    debounce: Duration,
    pending: Option<ViewportState>,
    last_change: Option<Instant>,
    last_saved: Option<ViewportState>,
}

impl Default for ViewportSaver {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_VIEWPORT_DEBOUNCE_MS))
    }
}

impl ViewportSaver {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            last_change: None,
            last_saved: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record a view change at `now`. Restarts the quiet period.
    pub fn note_change(&mut self, state: ViewportState, now: Instant) {
        if self.last_saved == Some(state) {
            self.pending = None;
            return;
        }
        self.pending = Some(state);
        self.last_change = Some(now);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// A write is pending and the view has been still long enough.
    pub fn is_due(&self, now: Instant) -> bool {
        match (self.pending, self.last_change) {
            (Some(_), Some(changed)) => now.saturating_duration_since(changed) >= self.debounce,
            _ => false,
        }
    }

    /// Write the pending viewport if due. Returns whether a write happened.
    pub async fn flush_due<P: Persistence + ?Sized>(
        &mut self,
        persistence: &P,
        project: ProjectId,
        now: Instant,
    ) -> PersistResult<bool> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.flush(persistence, project).await
    }

    /// Write the pending viewport now, regardless of the quiet period.
    pub async fn flush<P: Persistence + ?Sized>(
        &mut self,
        persistence: &P,
        project: ProjectId,
    ) -> PersistResult<bool> {
        let Some(state) = self.pending else {
            return Ok(false);
        };
        persistence.save_viewport(project, &state).await?;
        log::debug!("Saved {} viewport at zoom {:.2}", state.context.name(), state.zoom);
        self.pending = None;
        self.last_saved = Some(state);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryPersistence, Operation};
    use pollster::block_on;
    use uuid::Uuid;

    fn view(zoom: f64) -> ViewportState {
        ViewportState {
            context: Context::Map,
            center: GeoPoint::new(51.5, -0.12),
            zoom,
        }
    }

    #[test]
    fn test_debounce_coalesces_changes() {
        let store = MemoryPersistence::new();
        let project = Uuid::new_v4();
        let mut saver = ViewportSaver::default();
        let t0 = Instant::now();

        for i in 0..10 {
            saver.note_change(view(10.0 + i as f64 * 0.1), t0 + Duration::from_millis(i * 50));
        }
        let last_change = t0 + Duration::from_millis(450);
        assert!(!saver.is_due(last_change + Duration::from_millis(999)));
        assert!(!block_on(saver.flush_due(&store, project, last_change)).unwrap());

        let later = last_change + Duration::from_millis(1000);
        assert!(block_on(saver.flush_due(&store, project, later)).unwrap());
        assert_eq!(store.call_count(Operation::SaveViewport), 1);
        assert!((store.viewport(project).unwrap().zoom - 10.9).abs() < 1e-9);
        assert!(!saver.has_pending());
    }

    #[test]
    fn test_unchanged_view_not_rewritten() {
        let store = MemoryPersistence::new();
        let project = Uuid::new_v4();
        let mut saver = ViewportSaver::new(Duration::ZERO);
        let now = Instant::now();
        saver.note_change(view(12.0), now);
        assert!(block_on(saver.flush(&store, project)).unwrap());
        saver.note_change(view(12.0), now);
        assert!(!saver.has_pending());
        assert!(!block_on(saver.flush_due(&store, project, now)).unwrap());
    }

    #[test]
    fn test_failed_write_stays_pending() {
        let store = MemoryPersistence::new();
        store.fail_once(Operation::SaveViewport);
        let mut saver = ViewportSaver::new(Duration::ZERO);
        saver.note_change(view(3.0), Instant::now());
        assert!(block_on(saver.flush(&store, Uuid::nil())).is_err());
        assert!(saver.has_pending());
        assert!(block_on(saver.flush(&store, Uuid::nil())).unwrap());
    }
}

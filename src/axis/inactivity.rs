//! Volume reduction while the position stands still

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::catalog::{AxisCatalog, AxisId};
use crate::config::InactivityConfig;
use crate::math::Position;

/// Time taken to restore full volume once movement resumes
const RESTORE_SECS: f64 = 0.25;

/// Polling period of [`InactivityMonitor::spawn`]
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watches the position axes and drives `volume.inactivity`
pub struct InactivityMonitor {
    catalog: AxisCatalog,
    config: InactivityConfig,
    anchor: Position,
    last_motion: f64,
    idle: bool,
}

impl InactivityMonitor {
    pub fn new(catalog: AxisCatalog, config: InactivityConfig) -> Self {
        let now = catalog.now();
        let anchor = current_position(&catalog);
        Self {
            catalog,
            config,
            anchor,
            last_motion: now,
            idle: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Check for movement at `now` and schedule volume changes
    pub fn update(&mut self, now: f64) {
        if !self.config.enabled {
            return;
        }

        let position = current_position(&self.catalog);
        let moved = distance(position, self.anchor) > self.config.threshold;
        if moved {
            self.anchor = position;
            self.last_motion = now;
            if self.idle {
                self.idle = false;
                debug!("movement resumed, restoring volume");
                self.ramp_to(now, 1.0, RESTORE_SECS);
            }
            return;
        }

        if !self.idle && now - self.last_motion >= self.config.idle_secs {
            self.idle = true;
            debug!(
                "no movement for {:.1}s, lowering volume to {}",
                now - self.last_motion,
                self.config.volume
            );
            self.ramp_to(now, self.config.volume, self.config.ramp_secs);
        }
    }

    fn ramp_to(&self, now: f64, target: f64, secs: f64) {
        let axis = self.catalog.axis(AxisId::VolumeInactivity);
        let current = axis.interpolate(now);
        axis.add_at(now, current);
        axis.add_at(now + secs.max(0.0), target);
    }

    /// Poll on a tokio task until `stop` turns true
    pub fn spawn(mut self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = self.catalog.now();
                        self.update(now);
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn current_position(catalog: &AxisCatalog) -> Position {
    Position::new3(
        catalog.last_value(AxisId::PositionAlpha),
        catalog.last_value(AxisId::PositionBeta),
        catalog.last_value(AxisId::PositionGamma),
    )
}

fn distance(a: Position, b: Position) -> f64 {
    Position::new3(a.alpha - b.alpha, a.beta - b.beta, a.gamma - b.gamma).norm()
}

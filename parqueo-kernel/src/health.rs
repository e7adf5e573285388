use crate::link::LinkHealthView;
use crate::mode::OperatingMode;
use crate::models::UnitId;
use crate::monitor::SharedLinkMonitor;
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Foto del estado del kernel para /system/health.
#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub mode: OperatingMode,
    pub links: Vec<LinkHealthView>,
    pub active_sessions: usize,
    /// Reconexiones logradas por unidad desde el arranque.
    pub reconnects: HashMap<UnitId, u32>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    reconnects: Shared<HashMap<UnitId, u32>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconnects: new_state(HashMap::new()),
        }
    }

    /// Consume los eventos de transición del monitor y cuenta cada
    /// recuperación (muerto → vivo) por unidad.
    pub fn spawn_event_listener(&self, monitor: SharedLinkMonitor) {
        let tracker = self.clone();
        let mut rx = monitor.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if event.alive {
                    *tracker.reconnects.lock().entry(event.unit).or_insert(0) += 1;
                }
            }
        });
    }

    pub fn get_health(&self, monitor: &SharedLinkMonitor, active_sessions: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mode: monitor.current_mode(),
            links: monitor.health_views(),
            active_sessions,
            reconnects: self.reconnects.lock().clone(),
        }
    }
}

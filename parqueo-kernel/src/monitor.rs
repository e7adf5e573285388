/**
 * LINK MONITOR - Vigilancia y reconexión de los dos enlaces
 *
 * ROL :
 * Dueño de los dos Links y de su estado de vida. Corre un chequeo periódico
 * por enlace, re-disca mientras esté muerto (reintento infinito, sin
 * backoff: la falla esperada es una unidad brevemente fuera de línea) y
 * publica eventos de transición consumidos por el resto del sistema.
 *
 * FUNCIONAMIENTO :
 * - Una tarea tokio por enlace con intervalo fijo.
 * - Si el enlace tiene un comando en vuelo, el tick se salta (ver Link).
 * - Emite LinkEvent exactamente una vez por transición: la tarea recuerda
 *   el último estado publicado y compara contra la bandera viva, lo que
 *   también captura los caídos provocados por un send fallido entre ticks.
 * - Nadie más muta la vida de un enlace; el resto consulta snapshots.
 */
use crate::link::{Link, LinkHealthView};
use crate::mode::{resolve_mode, OperatingMode};
use crate::models::{LinkEvent, UnitId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Intervalo del chequeo de salud por enlace.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

pub struct LinkMonitor {
    parqueo1: Arc<Link>,
    parqueo2: Arc<Link>,
    events: broadcast::Sender<LinkEvent>,
}

pub type SharedLinkMonitor = Arc<LinkMonitor>;

impl LinkMonitor {
    /// El par completo va en la construcción: no existe un monitor con un
    /// enlace de menos.
    pub fn new(parqueo1: Arc<Link>, parqueo2: Arc<Link>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self { parqueo1, parqueo2, events }
    }

    pub fn link(&self, unit: UnitId) -> &Arc<Link> {
        match unit {
            UnitId::Parqueo1 => &self.parqueo1,
            UnitId::Parqueo2 => &self.parqueo2,
        }
    }

    pub fn is_alive(&self, unit: UnitId) -> bool {
        self.link(unit).is_alive()
    }

    /// Modo de operación derivado del par de banderas de vida actual.
    pub fn current_mode(&self) -> OperatingMode {
        resolve_mode(self.is_alive(UnitId::Parqueo1), self.is_alive(UnitId::Parqueo2))
    }

    /// Subconjunto de unidades actualmente vivas.
    pub fn available_units(&self) -> Vec<UnitId> {
        UnitId::ALL.into_iter().filter(|u| self.is_alive(*u)).collect()
    }

    pub fn health_views(&self) -> Vec<LinkHealthView> {
        UnitId::ALL.iter().map(|u| self.link(*u).health()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Arranca una tarea de vigilancia por enlace. El intervalo es parámetro
    /// para que los tests no dependan de tiempos de red reales.
    pub fn spawn_monitoring(monitor: SharedLinkMonitor, interval: Duration) {
        log::info!(
            "[monitor] starting link monitoring (interval: {}s)",
            interval.as_secs_f32()
        );
        for unit in UnitId::ALL {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                let link = monitor.link(unit).clone();
                let mut ticker = tokio::time::interval(interval);
                // Los enlaces nacen muertos; lo publicado arranca igual.
                let mut published_alive = false;

                loop {
                    ticker.tick().await;

                    // Un send fallido entre ticks ya volteó la bandera;
                    // publica esa transición antes de tocar la red.
                    monitor.publish_if_changed(unit, link.is_alive(), &mut published_alive);

                    match link.health_check().await {
                        Some(alive) => {
                            monitor.publish_if_changed(unit, alive, &mut published_alive)
                        }
                        None => {
                            // Comando en vuelo: tick saltado, nunca encolado.
                            log::debug!("[monitor] parqueo{} busy, skipping health tick", unit.number());
                        }
                    }
                }
            });
        }
    }

    fn publish_if_changed(&self, unit: UnitId, alive: bool, published: &mut bool) {
        if alive == *published {
            return;
        }
        *published = alive;
        if alive {
            log::info!("[monitor] parqueo{} connected", unit.number());
        } else {
            log::warn!("[monitor] parqueo{} disconnected", unit.number());
        }
        // Sin suscriptores no es un error; los eventos son best-effort.
        let _ = self.events.send(LinkEvent { unit, alive });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_monitor() -> LinkMonitor {
        LinkMonitor::new(
            Arc::new(Link::new(UnitId::Parqueo1, "127.0.0.1:1".into())),
            Arc::new(Link::new(UnitId::Parqueo2, "127.0.0.1:1".into())),
        )
    }

    #[test]
    fn test_link_lookup_resolves_each_unit() {
        let monitor = dead_monitor();
        for unit in UnitId::ALL {
            assert_eq!(monitor.link(unit).unit(), unit);
        }
        assert_eq!(monitor.health_views().len(), 2);
    }

    #[test]
    fn test_fresh_links_are_dead_and_mode_unavailable() {
        let monitor = dead_monitor();
        assert!(!monitor.is_alive(UnitId::Parqueo1));
        assert!(monitor.available_units().is_empty());
        assert_eq!(monitor.current_mode(), OperatingMode::Unavailable);
    }

    #[test]
    fn test_publish_only_on_transition() {
        let monitor = dead_monitor();
        let mut rx = monitor.subscribe();
        let mut published = false;

        monitor.publish_if_changed(UnitId::Parqueo1, false, &mut published);
        monitor.publish_if_changed(UnitId::Parqueo1, true, &mut published);
        monitor.publish_if_changed(UnitId::Parqueo1, true, &mut published);
        monitor.publish_if_changed(UnitId::Parqueo1, false, &mut published);
        monitor.publish_if_changed(UnitId::Parqueo1, false, &mut published);

        let first = rx.try_recv().unwrap();
        assert_eq!(first, LinkEvent { unit: UnitId::Parqueo1, alive: true });
        let second = rx.try_recv().unwrap();
        assert_eq!(second, LinkEvent { unit: UnitId::Parqueo1, alive: false });
        assert!(rx.try_recv().is_err());
    }
}

/**
 * COMMAND ROUTER - Despacho de comandos con puerta de disponibilidad
 *
 * ROL :
 * Única vía de salida de comandos hacia los controladores. Verifica la vida
 * de la unidad destino ANTES de tocar la red: contra una unidad conocida
 * como muerta jamás se intenta un comando.
 *
 * FUNCIONAMIENTO :
 * - dispatch() = puerta de vida + reenvío al Link + re-etiquetado de errores
 *   de transporte con la unidad afectada.
 * - open_passage() = máquina de tres pasos subir → espera → bajar. El primer
 *   fallo aborta los pasos restantes y es el error que se reporta; el bajar
 *   de emergencia corre como efecto secundario y su error solo va al log
 *   (nunca dejar la barrera arriba a propósito, pero tampoco enmascarar el
 *   fallo original).
 * - El router no tiene estado propio: solo referencias al monitor.
 */
use crate::link::LinkError;
use crate::models::UnitId;
use crate::monitor::SharedLinkMonitor;
use crate::protocol::Command;
use std::time::Duration;

/// Tiempo con la barrera arriba dentro de la secuencia de paso.
pub const PASSAGE_HOLD: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Rechazado antes de cualquier intento de red: la unidad ya se sabe muerta.
    #[error("parqueo {} no disponible: enlace caído", .0.number())]
    UnitUnavailable(UnitId),
    /// Falla de transporte o timeout durante el comando en tránsito.
    #[error("parqueo {} dejó de responder durante el comando", .0.number())]
    LinkUnavailable(UnitId),
}

impl DispatchError {
    pub fn unit(&self) -> UnitId {
        match self {
            DispatchError::UnitUnavailable(u) | DispatchError::LinkUnavailable(u) => *u,
        }
    }
}

pub struct CommandRouter {
    monitor: SharedLinkMonitor,
}

impl CommandRouter {
    pub fn new(monitor: SharedLinkMonitor) -> Self {
        Self { monitor }
    }

    /// Unidades contra las que se aceptan comandos ahora mismo.
    pub fn available_units(&self) -> Vec<UnitId> {
        self.monitor.available_units()
    }

    /// Reenvía un comando a la unidad destino. Contrato de carga: con la
    /// unidad muerta falla de inmediato, sin actividad de red.
    pub async fn dispatch(&self, unit: UnitId, command: Command) -> Result<String, DispatchError> {
        if !self.monitor.is_alive(unit) {
            return Err(DispatchError::UnitUnavailable(unit));
        }
        self.monitor
            .link(unit)
            .send(command)
            .await
            .map_err(|LinkError::Unavailable(u)| DispatchError::LinkUnavailable(u))
    }

    /// Secuencia completa de paso contra una unidad.
    pub async fn open_passage(&self, unit: UnitId) -> Result<String, DispatchError> {
        self.open_passage_with_hold(unit, PASSAGE_HOLD).await
    }

    pub async fn open_passage_with_hold(
        &self,
        unit: UnitId,
        hold: Duration,
    ) -> Result<String, DispatchError> {
        if let Err(e) = self.dispatch(unit, Command::Subir).await {
            self.lower_best_effort(unit).await;
            return Err(e);
        }

        tokio::time::sleep(hold).await;

        match self.dispatch(unit, Command::Bajar).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.lower_best_effort(unit).await;
                Err(e)
            }
        }
    }

    /// Intento de cierre tras un fallo en la secuencia. Su propio error se
    /// reporta solo por log: el error primario es el del paso que falló.
    async fn lower_best_effort(&self, unit: UnitId) {
        if let Err(e) = self.dispatch(unit, Command::Bajar).await {
            log::warn!(
                "[router] best-effort lower on parqueo{} also failed: {e}",
                unit.number()
            );
        } else {
            log::info!("[router] barrier on parqueo{} lowered after failed sequence", unit.number());
        }
    }
}

/**
 * SESSION LEDGER - Sesiones de ocupación, tarifas y estadísticas
 *
 * ROL :
 * Dueño exclusivo de las sesiones de ocupación y de los contadores
 * acumulados. Registra entradas y salidas contra el router (el lado físico
 * y el lógico avanzan o fallan juntos), calcula la tarifa al cierre y
 * persiste el snapshot tras cada mutación.
 *
 * REGLAS DE NEGOCIO (del sistema original) :
 * - A lo sumo una sesión abierta por vehículo, entre ambas unidades.
 * - Capacidad fija de 2 espacios por unidad.
 * - Tarifa: 1000 colones por bloque de 10 segundos, redondeo hacia arriba,
 *   mínimo un bloque aunque la estancia sea casi nula.
 * - Una salida no puede forzarse con su unidad caída: el estado físico de
 *   la barrera/LED no puede confirmarse, la sesión queda abierta.
 *
 * CONCURRENCIA :
 * Toda mutación corre bajo un único tokio::sync::Mutex sostenido durante
 * comando + mutación + persistencia: una mutación termina completa antes de
 * que empiece la siguiente, y los lectores ven estados enteros.
 */
use crate::models::{LedgerState, StatsRecord, UnitId, VehicleSession, ESPACIOS_POR_PARQUEO};
use crate::persist::{PersistenceGateway, PersistError};
use crate::protocol::Command;
use crate::router::{CommandRouter, DispatchError};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

/// Tarifa en colones por cada bloque iniciado.
pub const TARIFA_POR_BLOQUE: u64 = 1000;
/// Duración del bloque de facturación, en segundos.
pub const BLOQUE_SEGUNDOS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("parqueo {} no disponible", .0.number())]
    UnitUnavailable(UnitId),
    #[error("el vehículo {0} ya está en el parqueo")]
    DuplicateVehicle(String),
    #[error("el vehículo {0} no está registrado en el parqueo")]
    NoSuchSession(String),
    #[error("parqueo {} sin espacios disponibles", .0.number())]
    UnitFull(UnitId),
    #[error("espacio inválido: {0} (los espacios van de 1 a {ESPACIOS_POR_PARQUEO})")]
    InvalidSpace(u8),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// La mutación en memoria quedó aplicada y es autoritativa; solo falló
    /// la escritura del snapshot. La próxima mutación la reintenta.
    #[error("fallo de persistencia: {0}")]
    Persistence(#[from] PersistError),
}

/// Foto de estadísticas para la capa de presentación.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub parqueo1: StatsRecord,
    pub parqueo2: StatsRecord,
    pub total: StatsRecord,
    /// Colones por dólar usados en las conversiones de esta corrida.
    pub tipo_cambio: f64,
}

pub struct SessionLedger {
    inner: tokio::sync::Mutex<LedgerState>,
    router: Arc<CommandRouter>,
    gateway: PersistenceGateway,
    rate_crc_per_usd: f64,
}

pub type SharedLedger = Arc<SessionLedger>;

impl SessionLedger {
    pub fn new(
        state: LedgerState,
        router: Arc<CommandRouter>,
        gateway: PersistenceGateway,
        rate_crc_per_usd: f64,
    ) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(state),
            router,
            gateway,
            rate_crc_per_usd,
        }
    }

    /// Registra la entrada de un vehículo. El comando físico va primero: si
    /// el controlador no confirma, no se crea ninguna sesión.
    pub async fn register_entry(
        &self,
        vehicle_id: &str,
        unit: UnitId,
    ) -> Result<VehicleSession, LedgerError> {
        let mut state = self.inner.lock().await;

        if !self.router.available_units().contains(&unit) {
            return Err(LedgerError::UnitUnavailable(unit));
        }
        if state.active.contains_key(vehicle_id) {
            return Err(LedgerError::DuplicateVehicle(vehicle_id.to_string()));
        }
        if state.open_count(unit) >= ESPACIOS_POR_PARQUEO {
            return Err(LedgerError::UnitFull(unit));
        }

        self.router.dispatch(unit, Command::IngresoRemoto).await?;

        let session = VehicleSession {
            vehicle_id: vehicle_id.to_string(),
            unit,
            entered_at: OffsetDateTime::now_utc(),
            exited_at: None,
            fare_colones: None,
        };
        state.active.insert(vehicle_id.to_string(), session.clone());
        log::info!("[ledger] vehicle {vehicle_id} entered parqueo{}", unit.number());

        self.persist(&state).await?;
        Ok(session)
    }

    /// Registra la salida: calcula la tarifa, cierra la sesión y actualiza
    /// estadísticas. Con la unidad dueña caída la sesión queda abierta.
    pub async fn register_exit(&self, vehicle_id: &str) -> Result<VehicleSession, LedgerError> {
        let mut state = self.inner.lock().await;

        let Some(open) = state.active.get(vehicle_id) else {
            return Err(LedgerError::NoSuchSession(vehicle_id.to_string()));
        };
        let unit = open.unit;
        if !self.router.available_units().contains(&unit) {
            return Err(LedgerError::UnitUnavailable(unit));
        }

        self.router.dispatch(unit, Command::PagoRemoto).await?;

        let mut session = state
            .active
            .remove(vehicle_id)
            .ok_or_else(|| LedgerError::NoSuchSession(vehicle_id.to_string()))?;
        let exited_at = OffsetDateTime::now_utc();
        let fare = compute_fare(exited_at - session.entered_at);
        session.exited_at = Some(exited_at);
        session.fare_colones = Some(fare);

        state
            .stats
            .entry(unit)
            .or_default()
            .add_closed(fare, self.rate_crc_per_usd);
        state.stats_total.add_closed(fare, self.rate_crc_per_usd);
        state.history.push(session.clone());
        log::info!(
            "[ledger] vehicle {vehicle_id} exited parqueo{} (fare: ₡{fare})",
            unit.number()
        );

        self.persist(&state).await?;
        Ok(session)
    }

    /// Conmuta el LED de un espacio (índice basado en 1) y actualiza el
    /// snapshot persistido. Devuelve el nuevo estado del LED.
    pub async fn toggle_led(&self, unit: UnitId, space: u8) -> Result<bool, LedgerError> {
        if space == 0 || space as usize > ESPACIOS_POR_PARQUEO {
            return Err(LedgerError::InvalidSpace(space));
        }
        let mut state = self.inner.lock().await;

        if !self.router.available_units().contains(&unit) {
            return Err(LedgerError::UnitUnavailable(unit));
        }

        self.router.dispatch(unit, Command::ToggleLed(space)).await?;

        let leds = state.leds.entry(unit).or_default();
        let idx = (space - 1) as usize;
        leds[idx] = !leds[idx];
        let now_on = leds[idx];
        log::info!(
            "[ledger] parqueo{} espacio {space} LED -> {}",
            unit.number(),
            if now_on { "ocupado" } else { "libre" }
        );

        self.persist(&state).await?;
        Ok(now_on)
    }

    pub async fn active_sessions(&self) -> Vec<VehicleSession> {
        self.inner.lock().await.active.values().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active.len()
    }

    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        let state = self.inner.lock().await;
        StatsSnapshot {
            parqueo1: state.stats.get(&UnitId::Parqueo1).cloned().unwrap_or_default(),
            parqueo2: state.stats.get(&UnitId::Parqueo2).cloned().unwrap_or_default(),
            total: state.stats_total.clone(),
            tipo_cambio: self.rate_crc_per_usd,
        }
    }

    pub async fn leds_snapshot(&self) -> Vec<(UnitId, [bool; ESPACIOS_POR_PARQUEO])> {
        let state = self.inner.lock().await;
        UnitId::ALL
            .into_iter()
            .map(|u| (u, state.leds.get(&u).copied().unwrap_or_default()))
            .collect()
    }

    /// Escribe el snapshot. Un fallo se reporta pero la mutación en memoria
    /// ya quedó aplicada; no hay rollback del lado lógico porque el físico
    /// ya actuó.
    async fn persist(&self, state: &LedgerState) -> Result<(), LedgerError> {
        if let Err(e) = self.gateway.save(state).await {
            log::error!("[ledger] failed to persist snapshot: {e}");
            return Err(LedgerError::Persistence(e));
        }
        Ok(())
    }
}

/// Tarifa por tiempo de estancia: bloques de 10 segundos hacia arriba, con
/// piso de un bloque completo incluso para estancias casi nulas. El cómputo
/// va en milisegundos: cualquier fracción que pase el borde de un bloque
/// ya factura el bloque siguiente.
pub fn compute_fare(elapsed: time::Duration) -> u64 {
    let millis = elapsed.whole_milliseconds().max(0) as u64;
    let blocks = millis.div_ceil(BLOQUE_SEGUNDOS * 1000).max(1);
    blocks * TARIFA_POR_BLOQUE
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// Espacios físicos por parqueo (fijo: cada unidad tiene 2 plazas).
pub const ESPACIOS_POR_PARQUEO: usize = 2;

/// Identificador de unidad: exactamente dos parqueos, nunca se crean ni
/// destruyen en runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitId {
    Parqueo1,
    Parqueo2,
}

impl UnitId {
    pub const ALL: [UnitId; 2] = [UnitId::Parqueo1, UnitId::Parqueo2];

    /// Número visible para el operador (1 o 2).
    pub fn number(self) -> u8 {
        match self {
            UnitId::Parqueo1 => 1,
            UnitId::Parqueo2 => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<UnitId> {
        match n {
            1 => Some(UnitId::Parqueo1),
            2 => Some(UnitId::Parqueo2),
            _ => None,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parqueo{}", self.number())
    }
}

/// Evento de transición de vida de un enlace. El monitor lo emite exactamente
/// una vez por transición (nunca repite estado quieto).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub unit: UnitId,
    pub alive: bool,
}

/// Sesión de ocupación de un vehículo: de la entrada a la salida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSession {
    pub vehicle_id: String,
    pub unit: UnitId,
    #[serde(with = "time::serde::rfc3339")]
    pub entered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub exited_at: Option<OffsetDateTime>,
    /// Tarifa calculada al cierre, en colones.
    pub fare_colones: Option<u64>,
}

/// Contadores acumulados de sesiones cerradas. Solo crecen dentro de una
/// corrida; se reinician únicamente borrando el snapshot persistido.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRecord {
    pub total_vehiculos: u64,
    pub ganancias_colones: u64,
    pub ganancias_dolares: f64,
}

impl StatsRecord {
    pub fn add_closed(&mut self, fare_colones: u64, rate_crc_per_usd: f64) {
        self.total_vehiculos += 1;
        self.ganancias_colones += fare_colones;
        self.ganancias_dolares += fare_colones as f64 / rate_crc_per_usd;
    }
}

/// Estado completo del ledger tal como se persiste en disco.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    /// Sesiones abiertas, clave = identificador de vehículo.
    pub active: HashMap<String, VehicleSession>,
    /// Sesiones cerradas, en orden de cierre. Nunca se reabren.
    pub history: Vec<VehicleSession>,
    /// Snapshot del estado de los LEDs por espacio (true = ocupado).
    pub leds: HashMap<UnitId, [bool; ESPACIOS_POR_PARQUEO]>,
    /// Estadísticas por unidad.
    pub stats: HashMap<UnitId, StatsRecord>,
    /// Estadísticas agregadas de ambas unidades.
    pub stats_total: StatsRecord,
}

impl Default for LedgerState {
    fn default() -> Self {
        let mut leds = HashMap::new();
        let mut stats = HashMap::new();
        for unit in UnitId::ALL {
            leds.insert(unit, [false; ESPACIOS_POR_PARQUEO]);
            stats.insert(unit, StatsRecord::default());
        }
        Self {
            active: HashMap::new(),
            history: Vec::new(),
            leds,
            stats,
            stats_total: StatsRecord::default(),
        }
    }
}

impl LedgerState {
    /// Cantidad de sesiones abiertas contra una unidad.
    pub fn open_count(&self, unit: UnitId) -> usize {
        self.active.values().filter(|s| s.unit == unit).count()
    }
}

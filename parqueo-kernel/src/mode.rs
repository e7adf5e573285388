use crate::models::UnitId;
use serde::Serialize;

/// Modo de operación del sistema, derivado del par de enlaces vivos.
/// Nunca se almacena: se recalcula en cada consulta/transición.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "unit", rename_all = "lowercase")]
pub enum OperatingMode {
    /// Ambos enlaces vivos.
    Full,
    /// Exactamente un enlace vivo (cuál).
    Limited(UnitId),
    /// Ningún enlace vivo.
    Unavailable,
}

/// Función pura sobre el par de banderas de vida. Sin histéresis: el modo
/// cambia de forma inmediata y determinista con la conectividad.
pub fn resolve_mode(parqueo1_alive: bool, parqueo2_alive: bool) -> OperatingMode {
    match (parqueo1_alive, parqueo2_alive) {
        (true, true) => OperatingMode::Full,
        (true, false) => OperatingMode::Limited(UnitId::Parqueo1),
        (false, true) => OperatingMode::Limited(UnitId::Parqueo2),
        (false, false) => OperatingMode::Unavailable,
    }
}

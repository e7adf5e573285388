/**
 * PROTOCOLO DE CONTROLADOR - Capa tipada sobre el protocolo textual
 *
 * ROL :
 * Los controladores remotos hablan un protocolo de tokens UTF-8 de una línea
 * (SUBIR, BAJAR, ESTADO...). Este módulo confina todo el marshalling de texto
 * crudo: el resto del kernel solo maneja `Command` y respuestas ya leídas.
 *
 * FUNCIONAMIENTO :
 * - Command = enum tipado de todas las peticiones que entiende un controlador
 * - wire() produce el token exacto que espera el firmware
 * - EstadoReply = documento JSON que devuelve ESTADO en los controladores reales
 */
use crate::models::UnitId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Petición tipada hacia un controlador de parqueo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Subir la barrera.
    Subir,
    /// Bajar la barrera.
    Bajar,
    /// Secuencia de paso compuesta ejecutada por el firmware (subir, espera, bajar).
    AbrirPaso,
    /// Consulta de estado, usada también como chequeo de salud.
    Estado,
    /// Registrar un ingreso en el controlador (LEDs + contador de espacios).
    IngresoRemoto,
    /// Registrar un pago/salida en el controlador.
    PagoRemoto,
    /// Conmutar el LED de un espacio, índice basado en 1.
    ToggleLed(u8),
}

impl Command {
    /// Token textual exacto que espera el firmware del controlador.
    pub fn wire(&self) -> String {
        match self {
            Command::Subir => "SUBIR".to_string(),
            Command::Bajar => "BAJAR".to_string(),
            Command::AbrirPaso => "ABRIR_PASO".to_string(),
            Command::Estado => "ESTADO".to_string(),
            Command::IngresoRemoto => "INGRESO_REMOTO".to_string(),
            Command::PagoRemoto => "PAGO_REMOTO".to_string(),
            Command::ToggleLed(espacio) => format!("LED_TOGGLE_{espacio}"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire())
    }
}

/// Documento de estado que devuelve un controlador real ante `ESTADO`.
/// Los firmwares viejos contestan un token `ESTADO_OK_PARQUEO_n`; por eso
/// el chequeo de salud intenta el parse y guarda el documento solo cuando
/// el texto es JSON (ver `LinkHealthView::last_estado`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstadoReply {
    pub parqueo_id: u8,
    pub espacios_disponibles: u8,
    pub vehiculos_activos: u32,
    pub barrera_abierta: bool,
}

impl EstadoReply {
    /// Intenta interpretar una respuesta cruda de ESTADO como documento JSON.
    pub fn parse(raw: &str) -> Option<EstadoReply> {
        serde_json::from_str(raw.trim()).ok()
    }

    pub fn unit(&self) -> Option<UnitId> {
        UnitId::from_number(self.parqueo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tokens() {
        assert_eq!(Command::Subir.wire(), "SUBIR");
        assert_eq!(Command::Bajar.wire(), "BAJAR");
        assert_eq!(Command::AbrirPaso.wire(), "ABRIR_PASO");
        assert_eq!(Command::Estado.wire(), "ESTADO");
        assert_eq!(Command::IngresoRemoto.wire(), "INGRESO_REMOTO");
        assert_eq!(Command::PagoRemoto.wire(), "PAGO_REMOTO");
        assert_eq!(Command::ToggleLed(2).wire(), "LED_TOGGLE_2");
    }

    #[test]
    fn test_estado_reply_json() {
        let raw = r#"{"parqueo_id": 1, "espacios_disponibles": 2,
                      "vehiculos_activos": 0, "barrera_abierta": false}"#;
        let estado = EstadoReply::parse(raw).expect("JSON válido");
        assert_eq!(estado.unit(), Some(UnitId::Parqueo1));
        assert_eq!(estado.espacios_disponibles, 2);
    }

    #[test]
    fn test_estado_reply_token_is_not_json() {
        assert!(EstadoReply::parse("ESTADO_OK_PARQUEO_1").is_none());
    }
}

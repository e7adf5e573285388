/**
 * LINK - Cliente TCP punto a punto hacia un controlador de parqueo
 *
 * ROL :
 * Un Link por unidad. Es el único dueño de la conexión y del texto crudo
 * del protocolo: conecta con timeout acotado, hace un intercambio
 * petición/respuesta a la vez y mantiene la bandera de vida.
 *
 * FUNCIONAMIENTO :
 * - El stream vive detrás de un tokio::sync::Mutex: exactamente un comando
 *   en vuelo por enlace; un segundo send concurrente espera al primero
 *   (mandar "subir" con "bajar" pendiente es inseguro para la barrera).
 * - Timeout o error de transporte durante un send marca el enlace muerto
 *   en el acto, para que el siguiente chequeo/dispatch ya lo vea caído.
 * - El chequeo de salud usa try_lock: si hay un comando en vuelo se salta
 *   el tick en vez de encolarse detrás de la actuación.
 */
use crate::models::UnitId;
use crate::protocol::{Command, EstadoReply};
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Timeout del handshake TCP inicial.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout de cada intercambio petición/respuesta.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const REPLY_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link to parqueo {} unavailable", .0.number())]
    Unavailable(UnitId),
}

/// Contabilidad de salud de un enlace, detrás del mutex sincrónico.
#[derive(Debug, Clone, Default)]
struct HealthRecord {
    last_contact: Option<OffsetDateTime>,
    consecutive_failures: u32,
    last_estado: Option<EstadoReply>,
}

/// Vista de solo lectura de la salud de un enlace, para la API.
#[derive(Debug, Clone, Serialize)]
pub struct LinkHealthView {
    pub unit: UnitId,
    pub addr: String,
    pub alive: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_contact: Option<OffsetDateTime>,
    pub consecutive_failures: u32,
    /// Último documento ESTADO que parseó a JSON; None con firmwares que
    /// contestan el token plano.
    pub last_estado: Option<EstadoReply>,
}

pub struct Link {
    unit: UnitId,
    addr: String,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    alive: AtomicBool,
    health: Shared<HealthRecord>,
}

impl Link {
    pub fn new(unit: UnitId, addr: String) -> Self {
        Self {
            unit,
            addr,
            stream: tokio::sync::Mutex::new(None),
            alive: AtomicBool::new(false),
            health: new_state(HealthRecord::default()),
        }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Lectura sin bloqueo de la bandera de vida. El lector ve el valor
    /// pre o post transición, nunca un estado roto.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn health(&self) -> LinkHealthView {
        let record = self.health.lock().clone();
        LinkHealthView {
            unit: self.unit,
            addr: self.addr.clone(),
            alive: self.is_alive(),
            last_contact: record.last_contact,
            consecutive_failures: record.consecutive_failures,
            last_estado: record.last_estado,
        }
    }

    /// Handshake TCP acotado. Éxito: guarda el stream, marca vivo y
    /// reinicia el contador de fallas. Falla: marca muerto y la incrementa.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let mut guard = self.stream.lock().await;
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => {
                *guard = Some(stream);
                self.mark_alive();
                Ok(())
            }
            Ok(Err(e)) => {
                log::debug!("[link] parqueo{} connect failed ({e})", self.unit.number());
                *guard = None;
                self.mark_dead();
                Err(LinkError::Unavailable(self.unit))
            }
            Err(_) => {
                log::debug!("[link] parqueo{} connect timed out", self.unit.number());
                *guard = None;
                self.mark_dead();
                Err(LinkError::Unavailable(self.unit))
            }
        }
    }

    /// Un intercambio petición/respuesta. Precondición (del router, no se
    /// re-verifica aquí): el enlace está vivo. Timeout o error de transporte
    /// voltea la vida a muerto antes de devolver el error.
    pub async fn send(&self, command: Command) -> Result<String, LinkError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            self.mark_dead();
            return Err(LinkError::Unavailable(self.unit));
        };

        match exchange(stream, command).await {
            Ok(reply) => {
                self.mark_alive();
                Ok(reply)
            }
            Err(e) => {
                log::warn!(
                    "[link] parqueo{} {} failed ({e}), marking dead",
                    self.unit.number(),
                    command
                );
                *guard = None;
                self.mark_dead();
                Err(LinkError::Unavailable(self.unit))
            }
        }
    }

    /// Un tick de salud del monitor. Devuelve None si había un comando en
    /// vuelo (tick saltado), Some(vivo) en caso contrario.
    pub async fn health_check(&self) -> Option<bool> {
        let mut guard = match self.stream.try_lock() {
            Ok(guard) => guard,
            Err(_) => return None,
        };

        if guard.is_none() {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
                Ok(Ok(stream)) => *guard = Some(stream),
                _ => {
                    self.mark_dead();
                    return Some(false);
                }
            }
        }
        let Some(stream) = guard.as_mut() else {
            return Some(false);
        };

        // Consulta liviana de estado, distinta de los comandos de actuación.
        match exchange(stream, Command::Estado).await {
            Ok(reply) => {
                self.mark_alive();
                // Cualquier respuesta cuenta como vivo; el documento se
                // surfacea solo si el firmware contesta JSON.
                self.health.lock().last_estado = EstadoReply::parse(&reply);
                Some(true)
            }
            Err(e) => {
                log::debug!("[link] parqueo{} health check failed ({e})", self.unit.number());
                *guard = None;
                self.mark_dead();
                Some(false)
            }
        }
    }

    fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
        let mut record = self.health.lock();
        record.last_contact = Some(OffsetDateTime::now_utc());
        record.consecutive_failures = 0;
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
        self.health.lock().consecutive_failures += 1;
    }
}

/// Escribe el token del comando y lee una respuesta corta, todo bajo el
/// timeout fijo. 0 bytes leídos = el controlador cerró la conexión.
async fn exchange(stream: &mut TcpStream, command: Command) -> io::Result<String> {
    let fut = async {
        stream.write_all(command.wire().as_bytes()).await?;
        let mut buf = [0u8; REPLY_BUFFER];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "controller closed connection"));
        }
        Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
    };
    match timeout(COMMAND_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "command timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_connection_fails_and_marks_dead() {
        let link = Link::new(UnitId::Parqueo1, "localhost:1".to_string());
        let result = link.send(Command::Subir).await;
        assert!(matches!(result, Err(LinkError::Unavailable(UnitId::Parqueo1))));
        assert!(!link.is_alive());
        assert_eq!(link.health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_connect_refused_increments_failures() {
        // Puerto 1 en localhost: conexión rechazada de inmediato.
        let link = Link::new(UnitId::Parqueo2, "127.0.0.1:1".to_string());
        assert!(link.connect().await.is_err());
        assert!(link.connect().await.is_err());
        let health = link.health();
        assert!(!health.alive);
        assert_eq!(health.consecutive_failures, 2);
        assert!(health.last_contact.is_none());
    }
}

/*!
Controlador de parqueo simulado para desarrollo sin hardware

Réplica del firmware real vista desde el socket: acepta los tokens del
protocolo (SUBIR, BAJAR, ESTADO...) y contesta los acuses textuales del
controlador. Registra cada comando recibido y permite inyectar latencia o
fallas para probar timeouts, detección de caída y reconexión.
*/

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Comportamiento inyectable del controlador simulado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// Contesta como el firmware real.
    Normal,
    /// Cierra la conexión al recibir un comando (caída abrupta).
    DropConnections,
    /// Lee los comandos pero nunca contesta (provoca timeout del cliente).
    Mute,
}

struct MockShared {
    mode: Mutex<MockMode>,
    reply_delay: Mutex<Duration>,
    journal: Mutex<Vec<String>>,
    estado_json: Mutex<bool>,
}

pub struct MockUnitController {
    parqueo_id: u8,
    addr: SocketAddr,
    shared: Arc<MockShared>,
    handle: JoinHandle<()>,
}

impl MockUnitController {
    /// Arranca un controlador simulado en un puerto efímero de localhost.
    pub async fn start(parqueo_id: u8) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(MockShared {
            mode: Mutex::new(MockMode::Normal),
            reply_delay: Mutex::new(Duration::ZERO),
            journal: Mutex::new(Vec::new()),
            estado_json: Mutex::new(false),
        });

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        log::info!("[mock] parqueo {parqueo_id}: conexión desde {peer}");
                        let conn_shared = accept_shared.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, parqueo_id, conn_shared).await;
                        });
                    }
                    Err(e) => {
                        log::warn!("[mock] parqueo {parqueo_id}: accept error: {e}");
                        break;
                    }
                }
            }
        });

        log::info!("[mock] parqueo {parqueo_id} iniciado en {addr}");
        Ok(Self { parqueo_id, addr, shared, handle })
    }

    /// Dirección `host:puerto` para configurar el Link bajo prueba.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn parqueo_id(&self) -> u8 {
        self.parqueo_id
    }

    /// Comandos recibidos, en orden de llegada (para aserciones).
    pub fn commands(&self) -> Vec<String> {
        self.shared.journal.lock().clone()
    }

    pub fn clear_commands(&self) {
        self.shared.journal.lock().clear();
    }

    pub fn set_mode(&self, mode: MockMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Latencia artificial antes de cada respuesta.
    pub fn set_reply_delay(&self, delay: Duration) {
        *self.shared.reply_delay.lock() = delay;
    }

    /// Contesta ESTADO con el documento JSON del firmware actual en vez del
    /// token plano de los firmwares viejos.
    pub fn set_estado_json(&self, enabled: bool) {
        *self.shared.estado_json.lock() = enabled;
    }

    /// Apaga el listener: las conexiones nuevas serán rechazadas.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockUnitController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut socket: TcpStream, parqueo_id: u8, shared: Arc<MockShared>) {
    let mut buf = [0u8; 1024];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let comando = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        log::info!("[mock] parqueo {parqueo_id}: comando recibido: {comando}");
        shared.journal.lock().push(comando.clone());

        let mode = *shared.mode.lock();
        match mode {
            MockMode::DropConnections => break,
            MockMode::Mute => continue,
            MockMode::Normal => {}
        }

        let delay = *shared.reply_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let respuesta = if comando == "ESTADO" && *shared.estado_json.lock() {
            estado_json_for(parqueo_id)
        } else {
            reply_for(&comando, parqueo_id)
        };
        if socket.write_all(respuesta.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Documento ESTADO del firmware actual (los viejos contestan el token plano).
fn estado_json_for(parqueo_id: u8) -> String {
    format!(
        r#"{{"parqueo_id": {parqueo_id}, "espacios_disponibles": 2, "vehiculos_activos": 0, "barrera_abierta": false}}"#
    )
}

/// Respuestas calcadas del firmware de los controladores.
fn reply_for(comando: &str, parqueo_id: u8) -> String {
    match comando {
        "ESTADO" => format!("ESTADO_OK_PARQUEO_{parqueo_id}"),
        "SUBIR" | "BAJAR" | "ABRIR_PASO" => format!("OK_{comando}_PARQUEO_{parqueo_id}"),
        "INGRESO_REMOTO" => {
            format!("Parqueo {parqueo_id} - Ingreso remoto procesado exitosamente")
        }
        "PAGO_REMOTO" => format!("Parqueo {parqueo_id} - Pago remoto procesado exitosamente"),
        otro if otro.starts_with("LED_TOGGLE_") => format!("OK_{otro}_PARQUEO_{parqueo_id}"),
        otro => format!("ERROR_COMANDO_DESCONOCIDO_{otro}"),
    }
}

/**
 * PARQUEO KERNEL - Núcleo de orquestación de dos parqueos inteligentes
 *
 * ROL : Coordina dos unidades de parqueo físicamente independientes, cada
 * una con su controlador remoto sobre TCP, detrás de una sola superficie de
 * control que sigue siendo usable con una sola unidad alcanzable.
 *
 * ARQUITECTURA : Link (cliente TCP por unidad) + LinkMonitor (salud y
 * reconexión) + resolve_mode (modo derivado) + CommandRouter (despacho con
 * puerta de disponibilidad) + SessionLedger (sesiones y tarifas) +
 * PersistenceGateway (snapshot JSON) + API REST de presentación.
 */
pub mod config;
pub mod health;
pub mod http;
pub mod ledger;
pub mod link;
pub mod mode;
pub mod models;
pub mod monitor;
pub mod persist;
pub mod protocol;
pub mod rates;
pub mod router;
pub mod state;

/**
 * PARQUEO KERNEL - Punto de entrada principal
 *
 * ROL : Bootstrap del sistema completo: config, snapshot persistido, tasa
 * de cambio, enlaces a los dos controladores, monitoreo de salud y API REST.
 */
use parqueo_kernel::config::load_config;
use parqueo_kernel::health::HealthTracker;
use parqueo_kernel::http::{self, AppState};
use parqueo_kernel::ledger::SessionLedger;
use parqueo_kernel::link::Link;
use parqueo_kernel::models::{LedgerState, UnitId};
use parqueo_kernel::monitor::{LinkMonitor, HEALTH_INTERVAL};
use parqueo_kernel::persist::PersistenceGateway;
use parqueo_kernel::rates;
use parqueo_kernel::router::CommandRouter;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Variables de entorno desde .env (si existe)
    dotenvy::dotenv().ok();
    env_logger::init();

    let cfg = load_config().await;

    // Snapshot del ledger: sin archivo previo se arranca vacío.
    let gateway = PersistenceGateway::new(cfg.data_file());
    let ledger_state = match gateway.load().await {
        Ok(state) => state,
        Err(e) => {
            log::error!("[kernel] failed to load ledger snapshot: {e}, starting fresh");
            LedgerState::default()
        }
    };

    // Tasa CRC/USD, una consulta por corrida.
    let rate = rates::fetch_rate().await;

    // Enlaces a los dos controladores; la conexión inicial es best-effort,
    // el monitor re-disca para siempre a las unidades caídas.
    let [link1, link2] =
        UnitId::ALL.map(|unit| Arc::new(Link::new(unit, cfg.unit(unit).addr())));
    for link in [&link1, &link2] {
        if link.connect().await.is_err() {
            log::warn!("[kernel] parqueo{} unreachable at startup", link.unit().number());
        }
    }

    let monitor = Arc::new(LinkMonitor::new(link1, link2));
    let health_tracker = HealthTracker::new();
    health_tracker.spawn_event_listener(monitor.clone());
    LinkMonitor::spawn_monitoring(monitor.clone(), HEALTH_INTERVAL);

    let router = Arc::new(CommandRouter::new(monitor.clone()));
    let ledger = Arc::new(SessionLedger::new(ledger_state, router.clone(), gateway, rate));

    if std::env::var("PARQUEO_API_KEY").unwrap_or_default().is_empty() {
        log::warn!("[kernel] PARQUEO_API_KEY not set, API runs without auth (local surface)");
    }

    let app_state = AppState {
        monitor,
        router,
        ledger,
        health_tracker,
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port()));
    log::info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

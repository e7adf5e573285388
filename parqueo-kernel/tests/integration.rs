//! Tests de integración contra controladores simulados del devkit.
//!
//! Cada test levanta sus propios mocks en puertos efímeros de localhost;
//! no hay estado compartido entre tests ni dependencia de hardware.

use parqueo_devkit::{init_test_logging, MockMode, MockUnitController};
use parqueo_kernel::ledger::{LedgerError, SessionLedger, TARIFA_POR_BLOQUE};
use parqueo_kernel::link::Link;
use parqueo_kernel::mode::OperatingMode;
use parqueo_kernel::models::{LinkEvent, UnitId};
use parqueo_kernel::monitor::{LinkMonitor, SharedLinkMonitor};
use parqueo_kernel::persist::PersistenceGateway;
use parqueo_kernel::protocol::Command;
use parqueo_kernel::router::{CommandRouter, DispatchError};

use std::sync::Arc;
use std::time::{Duration, Instant};

const TEST_RATE: f64 = 500.0;

struct Rig {
    mock1: MockUnitController,
    mock2: MockUnitController,
    monitor: SharedLinkMonitor,
    router: Arc<CommandRouter>,
}

/// Levanta dos controladores simulados y conecta ambos enlaces.
async fn rig_both_alive() -> Rig {
    init_test_logging();
    let mock1 = MockUnitController::start(1).await.expect("mock 1");
    let mock2 = MockUnitController::start(2).await.expect("mock 2");

    let link1 = Arc::new(Link::new(UnitId::Parqueo1, mock1.addr()));
    let link2 = Arc::new(Link::new(UnitId::Parqueo2, mock2.addr()));
    link1.connect().await.expect("connect parqueo1");
    link2.connect().await.expect("connect parqueo2");

    let monitor = Arc::new(LinkMonitor::new(link1, link2));
    let router = Arc::new(CommandRouter::new(monitor.clone()));
    Rig { mock1, mock2, monitor, router }
}

fn ledger_for(rig: &Rig, dir: &tempfile::TempDir) -> SessionLedger {
    let gateway = PersistenceGateway::new(dir.path().join("datos.json"));
    SessionLedger::new(Default::default(), rig.router.clone(), gateway, TEST_RATE)
}

#[tokio::test]
async fn test_dispatch_roundtrip() {
    let rig = rig_both_alive().await;

    let reply = rig.router.dispatch(UnitId::Parqueo1, Command::Subir).await.unwrap();
    assert_eq!(reply, "OK_SUBIR_PARQUEO_1");
    assert_eq!(rig.mock1.commands(), vec!["SUBIR".to_string()]);
    // El comando jamás toca la otra unidad.
    assert!(rig.mock2.commands().is_empty());
    assert_eq!(rig.monitor.current_mode(), OperatingMode::Full);
}

#[tokio::test]
async fn test_dispatch_dead_unit_never_touches_network() {
    init_test_logging();
    let mock1 = MockUnitController::start(1).await.unwrap();
    let mock2 = MockUnitController::start(2).await.unwrap();

    let link1 = Arc::new(Link::new(UnitId::Parqueo1, mock1.addr()));
    let link2 = Arc::new(Link::new(UnitId::Parqueo2, mock2.addr()));
    // Solo parqueo1 se conecta; parqueo2 queda muerto aunque el mock exista.
    link1.connect().await.unwrap();

    let monitor = Arc::new(LinkMonitor::new(link1, link2));
    let router = CommandRouter::new(monitor.clone());

    let result = router.dispatch(UnitId::Parqueo2, Command::Subir).await;
    assert!(matches!(result, Err(DispatchError::UnitUnavailable(UnitId::Parqueo2))));
    assert!(mock2.commands().is_empty());

    assert_eq!(router.available_units(), vec![UnitId::Parqueo1]);
    assert_eq!(monitor.current_mode(), OperatingMode::Limited(UnitId::Parqueo1));
}

#[tokio::test]
async fn test_timeout_mid_command_emits_single_transition() {
    let rig = rig_both_alive().await;
    let mut events = rig.monitor.subscribe();
    LinkMonitor::spawn_monitoring(rig.monitor.clone(), Duration::from_millis(50));

    // Primer tick: ambos enlaces ya estaban vivos, una transición por unidad
    // (el orden entre las dos tareas no está garantizado).
    let mut initial = Vec::new();
    for _ in 0..2 {
        let ev = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event in time")
            .unwrap();
        assert!(ev.alive);
        initial.push(ev.unit);
    }
    initial.sort_by_key(|u| u.number());
    assert_eq!(initial, vec![UnitId::Parqueo1, UnitId::Parqueo2]);

    // Caída abrupta a mitad de comando: la vida voltea en el acto. Según
    // quién pierda la carrera (el comando o un tick de salud), el error es
    // de tránsito o el rechazo por puerta de vida; la unidad es la misma.
    rig.mock1.set_mode(MockMode::DropConnections);
    let result = rig.router.dispatch(UnitId::Parqueo1, Command::Subir).await;
    assert_eq!(result.unwrap_err().unit(), UnitId::Parqueo1);
    assert!(!rig.monitor.is_alive(UnitId::Parqueo1));

    let ev = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event in time")
        .unwrap();
    assert_eq!(ev, LinkEvent { unit: UnitId::Parqueo1, alive: false });

    // Timeouts repetidos estando ya muerto no duplican eventos.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(rig.monitor.current_mode(), OperatingMode::Limited(UnitId::Parqueo2));
}

#[tokio::test]
async fn test_monitor_reconnects_after_recovery() {
    let rig = rig_both_alive().await;
    let mut events = rig.monitor.subscribe();
    LinkMonitor::spawn_monitoring(rig.monitor.clone(), Duration::from_millis(50));

    // Consumir las dos transiciones iniciales a vivo.
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("initial event")
            .unwrap();
    }

    rig.mock1.set_mode(MockMode::DropConnections);
    let _ = rig.router.dispatch(UnitId::Parqueo1, Command::Subir).await;
    let ev = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("down event")
        .unwrap();
    assert_eq!(ev, LinkEvent { unit: UnitId::Parqueo1, alive: false });

    // La unidad vuelve: el monitor re-disca solo, sin backoff.
    rig.mock1.set_mode(MockMode::Normal);
    let ev = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("recovery event")
        .unwrap();
    assert_eq!(ev, LinkEvent { unit: UnitId::Parqueo1, alive: true });
    assert_eq!(rig.monitor.current_mode(), OperatingMode::Full);

    // Y tras la recuperación el despacho vuelve a fluir.
    let reply = rig.router.dispatch(UnitId::Parqueo1, Command::Bajar).await.unwrap();
    assert_eq!(reply, "OK_BAJAR_PARQUEO_1");
}

#[tokio::test]
async fn test_same_unit_commands_serialize() {
    let rig = rig_both_alive().await;
    rig.mock1.set_reply_delay(Duration::from_millis(300));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        rig.router.dispatch(UnitId::Parqueo1, Command::Subir),
        rig.router.dispatch(UnitId::Parqueo1, Command::Bajar),
    );
    let elapsed = started.elapsed();

    a.unwrap();
    b.unwrap();
    // Estrictamente uno tras otro: dos respuestas de 300ms no pueden solaparse.
    assert!(elapsed >= Duration::from_millis(550), "elapsed: {elapsed:?}");
    let journal = rig.mock1.commands();
    assert_eq!(journal.len(), 2);
    // Sin bytes entrelazados: cada entrada es un token completo del protocolo.
    assert!(journal.iter().all(|c| c == "SUBIR" || c == "BAJAR"));
}

#[tokio::test]
async fn test_cross_unit_commands_overlap() {
    let rig = rig_both_alive().await;
    rig.mock1.set_reply_delay(Duration::from_millis(300));
    rig.mock2.set_reply_delay(Duration::from_millis(300));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        rig.router.dispatch(UnitId::Parqueo1, Command::Subir),
        rig.router.dispatch(UnitId::Parqueo2, Command::Subir),
    );
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap(), "OK_SUBIR_PARQUEO_1");
    assert_eq!(b.unwrap(), "OK_SUBIR_PARQUEO_2");
    // Unidades distintas son independientes: corren en paralelo.
    assert!(elapsed < Duration::from_millis(550), "elapsed: {elapsed:?}");
}

#[tokio::test]
async fn test_passage_sequence_executes_raise_then_lower() {
    let rig = rig_both_alive().await;

    // Secuencia feliz: subir, espera, bajar.
    let reply = rig
        .router
        .open_passage_with_hold(UnitId::Parqueo1, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(reply, "OK_BAJAR_PARQUEO_1");
    assert_eq!(rig.mock1.commands(), vec!["SUBIR".to_string(), "BAJAR".to_string()]);
}

#[tokio::test]
async fn test_firmware_composite_passage_sends_single_token() {
    let rig = rig_both_alive().await;

    // Variante delegada: un solo token, el firmware secuencia él solo.
    let reply = rig.router.dispatch(UnitId::Parqueo1, Command::AbrirPaso).await.unwrap();
    assert_eq!(reply, "OK_ABRIR_PASO_PARQUEO_1");
    assert_eq!(rig.mock1.commands(), vec!["ABRIR_PASO".to_string()]);
}

#[tokio::test]
async fn test_health_check_surfaces_estado_document() {
    let rig = rig_both_alive().await;
    let link = rig.monitor.link(UnitId::Parqueo1);

    // Firmware viejo: token plano, vivo pero sin documento.
    assert_eq!(link.health_check().await, Some(true));
    assert!(link.health().last_estado.is_none());

    // Firmware actual: el documento JSON queda en la vista de salud.
    rig.mock1.set_estado_json(true);
    assert_eq!(link.health_check().await, Some(true));
    let estado = link.health().last_estado.expect("documento ESTADO");
    assert_eq!(estado.unit(), Some(UnitId::Parqueo1));
    assert_eq!(estado.espacios_disponibles, 2);
    assert!(!estado.barrera_abierta);
}

#[tokio::test]
async fn test_entry_exit_lifecycle_with_stats() {
    let rig = rig_both_alive().await;
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_for(&rig, &dir);

    let session = ledger.register_entry("ABC123", UnitId::Parqueo1).await.unwrap();
    assert_eq!(session.unit, UnitId::Parqueo1);
    assert!(rig.mock1.commands().contains(&"INGRESO_REMOTO".to_string()));
    assert_eq!(ledger.active_count().await, 1);

    // A lo sumo una sesión abierta por vehículo, entre ambas unidades.
    let dup = ledger.register_entry("ABC123", UnitId::Parqueo2).await;
    assert!(matches!(dup, Err(LedgerError::DuplicateVehicle(_))));
    assert!(rig.mock2.commands().is_empty());

    // Capacidad fija de 2 por unidad.
    ledger.register_entry("DEF456", UnitId::Parqueo1).await.unwrap();
    let full = ledger.register_entry("GHI789", UnitId::Parqueo1).await;
    assert!(matches!(full, Err(LedgerError::UnitFull(UnitId::Parqueo1))));

    // Salida inmediata: piso de un bloque completo.
    let closed = ledger.register_exit("ABC123").await.unwrap();
    assert_eq!(closed.fare_colones, Some(TARIFA_POR_BLOQUE));
    assert!(closed.exited_at.is_some());
    assert!(rig.mock1.commands().contains(&"PAGO_REMOTO".to_string()));
    assert_eq!(ledger.active_count().await, 1);

    let stats = ledger.stats_snapshot().await;
    assert_eq!(stats.parqueo1.total_vehiculos, 1);
    assert_eq!(stats.parqueo1.ganancias_colones, TARIFA_POR_BLOQUE);
    assert_eq!(stats.total.total_vehiculos, 1);
    assert!((stats.total.ganancias_dolares - TARIFA_POR_BLOQUE as f64 / TEST_RATE).abs() < 1e-9);

    // Con un espacio liberado la unidad vuelve a aceptar entradas.
    ledger.register_entry("GHI789", UnitId::Parqueo1).await.unwrap();
}

#[tokio::test]
async fn test_exit_without_session() {
    let rig = rig_both_alive().await;
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_for(&rig, &dir);

    let result = ledger.register_exit("NOEXISTE").await;
    assert!(matches!(result, Err(LedgerError::NoSuchSession(_))));
}

#[tokio::test]
async fn test_entry_against_dead_unit_creates_no_session() {
    // Escenario del contrato: parqueo1 vivo, parqueo2 muerto.
    init_test_logging();
    let mock1 = MockUnitController::start(1).await.unwrap();
    let mock2 = MockUnitController::start(2).await.unwrap();
    let link1 = Arc::new(Link::new(UnitId::Parqueo1, mock1.addr()));
    let link2 = Arc::new(Link::new(UnitId::Parqueo2, mock2.addr()));
    link1.connect().await.unwrap();

    let monitor = Arc::new(LinkMonitor::new(link1, link2));
    let router = Arc::new(CommandRouter::new(monitor));
    let dir = tempfile::tempdir().unwrap();
    let gateway = PersistenceGateway::new(dir.path().join("datos.json"));
    let ledger = SessionLedger::new(Default::default(), router, gateway, TEST_RATE);

    let result = ledger.register_entry("ABC123", UnitId::Parqueo2).await;
    assert!(matches!(result, Err(LedgerError::UnitUnavailable(UnitId::Parqueo2))));
    assert_eq!(ledger.active_count().await, 0);
    assert!(mock2.commands().is_empty());
}

#[tokio::test]
async fn test_exit_blocked_while_owning_unit_dead() {
    let rig = rig_both_alive().await;
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_for(&rig, &dir);

    ledger.register_entry("ABC123", UnitId::Parqueo1).await.unwrap();

    // La unidad dueña cae a mitad de un comando cualquiera.
    rig.mock1.set_mode(MockMode::DropConnections);
    let _ = rig.router.dispatch(UnitId::Parqueo1, Command::Estado).await;
    assert!(!rig.monitor.is_alive(UnitId::Parqueo1));

    // La salida no puede forzarse: la sesión queda abierta.
    let result = ledger.register_exit("ABC123").await;
    assert!(matches!(result, Err(LedgerError::UnitUnavailable(UnitId::Parqueo1))));
    assert_eq!(ledger.active_count().await, 1);

    // Recuperada la unidad, la salida procede con normalidad.
    rig.mock1.set_mode(MockMode::Normal);
    rig.monitor.link(UnitId::Parqueo1).connect().await.unwrap();
    let closed = ledger.register_exit("ABC123").await.unwrap();
    assert_eq!(closed.fare_colones, Some(TARIFA_POR_BLOQUE));
    assert_eq!(ledger.active_count().await, 0);
}

#[tokio::test]
async fn test_led_toggle_roundtrip() {
    let rig = rig_both_alive().await;
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_for(&rig, &dir);

    assert!(ledger.toggle_led(UnitId::Parqueo1, 1).await.unwrap());
    assert!(!ledger.toggle_led(UnitId::Parqueo1, 1).await.unwrap());
    assert_eq!(
        rig.mock1.commands(),
        vec!["LED_TOGGLE_1".to_string(), "LED_TOGGLE_1".to_string()]
    );

    let invalid = ledger.toggle_led(UnitId::Parqueo1, 3).await;
    assert!(matches!(invalid, Err(LedgerError::InvalidSpace(3))));
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let rig = rig_both_alive().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datos.json");

    {
        let gateway = PersistenceGateway::new(&path);
        let ledger = SessionLedger::new(Default::default(), rig.router.clone(), gateway, TEST_RATE);
        ledger.register_entry("ABC123", UnitId::Parqueo1).await.unwrap();
        ledger.register_entry("DEF456", UnitId::Parqueo2).await.unwrap();
        ledger.register_exit("DEF456").await.unwrap();
    }

    // "Reinicio": un gateway nuevo carga el snapshot y el ledger continúa.
    let gateway = PersistenceGateway::new(&path);
    let restored = gateway.load().await.unwrap();
    assert_eq!(restored.active.len(), 1);
    assert!(restored.active.contains_key("ABC123"));
    assert_eq!(restored.history.len(), 1);
    assert_eq!(restored.stats_total.total_vehiculos, 1);

    let ledger = SessionLedger::new(restored, rig.router.clone(), gateway, TEST_RATE);
    let closed = ledger.register_exit("ABC123").await.unwrap();
    assert_eq!(closed.unit, UnitId::Parqueo1);
    assert_eq!(ledger.active_count().await, 0);
}

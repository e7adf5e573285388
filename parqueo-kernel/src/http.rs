/**
 * API REST PARQUEO - Superficie de control y lectura del kernel
 *
 * ROL :
 * Punto de enganche de la capa de presentación (la GUI de administración).
 * Lecturas sin efectos secundarios (modo, unidades, sesiones, estadísticas)
 * seguras de sondear a cualquier ritmo, más los intents de comando.
 *
 * FUNCIONAMIENTO :
 * - Servidor Axum, rutas /health, /system, /mode, /units, /sessions,
 *   /stats, /leds, /barrier, /entries, /exits
 * - Serialización JSON automática de las respuestas
 * - Errores tipados del kernel mapeados a códigos HTTP distinguibles
 *   (503 unidad caída, 409 precondición del ledger, 404 sin sesión...)
 *
 * SEGURIDAD :
 * - Header x-api-key contra PARQUEO_API_KEY en todas las rutas salvo /health
 * - Sin clave configurada el acceso queda abierto (superficie local)
 */
use crate::health::{HealthTracker, KernelHealth};
use crate::ledger::{LedgerError, SharedLedger, StatsSnapshot};
use crate::mode::OperatingMode;
use crate::models::{UnitId, VehicleSession, ESPACIOS_POR_PARQUEO};
use crate::monitor::SharedLinkMonitor;
use crate::protocol::Command;
use crate::router::{CommandRouter, DispatchError};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub monitor: SharedLinkMonitor,
    pub router: Arc<CommandRouter>,
    pub ledger: SharedLedger,
    pub health_tracker: HealthTracker,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check siempre accesible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("PARQUEO_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        // Superficie local: sin clave configurada no se exige header.
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/mode", get(get_mode))
        .route("/units", get(get_units))
        .route("/sessions", get(get_sessions))
        .route("/stats", get(get_stats))
        .route("/leds", get(get_leds))
        .route("/barrier/{unit}/{action}", post(post_barrier))
        .route("/entries", post(post_entry))
        .route("/exits", post(post_exit))
        .route("/leds/{unit}/{space}", post(post_led_toggle))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

fn parse_unit(raw: u8) -> Result<UnitId, (StatusCode, Json<serde_json::Value>)> {
    UnitId::from_number(raw).ok_or_else(|| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": format!("unidad inválida: {raw} (use 1 o 2)") })),
        )
    })
}

fn dispatch_error_response(e: &DispatchError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": e.to_string(), "unit": e.unit().number() })),
    )
}

fn ledger_error_response(e: &LedgerError) -> (StatusCode, Json<serde_json::Value>) {
    let (code, unit) = match e {
        LedgerError::UnitUnavailable(u) => (StatusCode::SERVICE_UNAVAILABLE, Some(u.number())),
        LedgerError::Dispatch(d) => (StatusCode::SERVICE_UNAVAILABLE, Some(d.unit().number())),
        LedgerError::DuplicateVehicle(_) => (StatusCode::CONFLICT, None),
        LedgerError::UnitFull(u) => (StatusCode::CONFLICT, Some(u.number())),
        LedgerError::NoSuchSession(_) => (StatusCode::NOT_FOUND, None),
        LedgerError::InvalidSpace(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
        LedgerError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    let mut body = serde_json::json!({ "error": e.to_string() });
    if let Some(n) = unit {
        body["unit"] = serde_json::json!(n);
    }
    (code, Json(body))
}

// GET /system/health (estado de la infraestructura)
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let active = app.ledger.active_count().await;
    Json(app.health_tracker.get_health(&app.monitor, active))
}

// GET /mode (modo de operación derivado, recalculado en cada consulta)
async fn get_mode(State(app): State<AppState>) -> Json<OperatingMode> {
    Json(app.monitor.current_mode())
}

// GET /units (vida por unidad + subconjunto disponible)
async fn get_units(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "units": app.monitor.health_views(),
        "available": app.router.available_units(),
        "mode": app.monitor.current_mode(),
    }))
}

// GET /sessions (sesiones abiertas)
async fn get_sessions(State(app): State<AppState>) -> Json<Vec<VehicleSession>> {
    Json(app.ledger.active_sessions().await)
}

// GET /stats (acumulados por unidad y agregados)
async fn get_stats(State(app): State<AppState>) -> Json<StatsSnapshot> {
    Json(app.ledger.stats_snapshot().await)
}

// GET /leds (snapshot de LEDs por espacio)
async fn get_leds(State(app): State<AppState>) -> Json<serde_json::Value> {
    let leds = app.ledger.leds_snapshot().await;
    let map: serde_json::Map<String, serde_json::Value> = leds
        .into_iter()
        .map(|(unit, estados)| (unit.to_string(), serde_json::json!(estados)))
        .collect();
    Json(serde_json::Value::Object(map))
}

// POST /barrier/{unit}/{action} (subir | bajar | abrir_paso | abrir_paso_remoto)
async fn post_barrier(
    State(app): State<AppState>,
    Path((unit_raw, action)): Path<(u8, String)>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let unit = parse_unit(unit_raw)?;
    let result = match action.as_str() {
        "subir" => app.router.dispatch(unit, Command::Subir).await,
        "bajar" => app.router.dispatch(unit, Command::Bajar).await,
        "abrir_paso" => app.router.open_passage(unit).await,
        // Variante delegada: el firmware ejecuta la secuencia completa solo.
        "abrir_paso_remoto" => app.router.dispatch(unit, Command::AbrirPaso).await,
        other => {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": format!("acción desconocida: {other}") })),
            ))
        }
    };
    match result {
        Ok(reply) => Ok(Json(serde_json::json!({ "ok": true, "reply": reply }))),
        Err(e) => Err(dispatch_error_response(&e)),
    }
}

#[derive(Debug, Deserialize)]
struct EntryParams {
    vehicle_id: String,
    unit: u8,
}

// POST /entries (registrar entrada de vehículo)
async fn post_entry(
    State(app): State<AppState>,
    Json(params): Json<EntryParams>,
) -> Result<Json<VehicleSession>, (StatusCode, Json<serde_json::Value>)> {
    let unit = parse_unit(params.unit)?;
    match app.ledger.register_entry(&params.vehicle_id, unit).await {
        Ok(session) => Ok(Json(session)),
        Err(e) => Err(ledger_error_response(&e)),
    }
}

#[derive(Debug, Deserialize)]
struct ExitParams {
    vehicle_id: String,
}

// POST /exits (registrar salida y facturar)
async fn post_exit(
    State(app): State<AppState>,
    Json(params): Json<ExitParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match app.ledger.register_exit(&params.vehicle_id).await {
        Ok(session) => {
            let fare = session.fare_colones.unwrap_or_default();
            let stats = app.ledger.stats_snapshot().await;
            Ok(Json(serde_json::json!({
                "session": session,
                "fare_colones": fare,
                "fare_dolares": fare as f64 / stats.tipo_cambio,
            })))
        }
        Err(e) => Err(ledger_error_response(&e)),
    }
}

// POST /leds/{unit}/{space} (conmutar LED de un espacio)
async fn post_led_toggle(
    State(app): State<AppState>,
    Path((unit_raw, space)): Path<(u8, u8)>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let unit = parse_unit(unit_raw)?;
    if space == 0 || space as usize > ESPACIOS_POR_PARQUEO {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": format!("espacio inválido: {space}") })),
        ));
    }
    match app.ledger.toggle_led(unit, space).await {
        Ok(now_on) => Ok(Json(serde_json::json!({
            "unit": unit.number(),
            "space": space,
            "ocupado": now_on,
        }))),
        Err(e) => Err(ledger_error_response(&e)),
    }
}

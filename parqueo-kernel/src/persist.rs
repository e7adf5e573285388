/**
 * PERSISTENCIA - Snapshot JSON del ledger en disco
 *
 * ROL :
 * Gateway de persistencia del ledger: `load()` una vez al arranque,
 * `save()` después de cada mutación. El formato es el snapshot histórico
 * `parqueo_datos.json` (sesiones activas, historial, LEDs, estadísticas).
 *
 * FUNCIONAMIENTO :
 * La escritura es atómica desde el punto de vista del kernel: se escribe un
 * archivo temporal al lado del destino y se renombra encima. Un crash entre
 * mutación y save nunca corrompe el snapshot anterior.
 */
use crate::models::LedgerState;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct PersistenceGateway {
    data_file: PathBuf,
}

impl PersistenceGateway {
    pub fn new<P: AsRef<Path>>(data_file: P) -> Self {
        Self { data_file: data_file.as_ref().to_path_buf() }
    }

    /// Carga el snapshot al arranque. Sin archivo previo arranca vacío;
    /// eso no es un error.
    pub async fn load(&self) -> Result<LedgerState, PersistError> {
        if !self.data_file.exists() {
            log::info!("[persist] no existing data file, starting fresh");
            return Ok(LedgerState::default());
        }
        let content = fs::read_to_string(&self.data_file).await?;
        let state: LedgerState = serde_json::from_str(&content)?;
        log::info!(
            "[persist] loaded {} active sessions, {} historical from {}",
            state.active.len(),
            state.history.len(),
            self.data_file.display()
        );
        Ok(state)
    }

    /// Escribe el snapshot completo. Temporal + rename para que el archivo
    /// previo sobreviva cualquier interrupción a mitad de escritura.
    pub async fn save(&self, state: &LedgerState) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.data_file.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.data_file).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UnitId, VehicleSession};
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_load_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::new(dir.path().join("datos.json"));
        let state = gateway.load().await.unwrap();
        assert!(state.active.is_empty());
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::new(dir.path().join("datos.json"));

        let mut state = LedgerState::default();
        state.active.insert(
            "ABC123".to_string(),
            VehicleSession {
                vehicle_id: "ABC123".to_string(),
                unit: UnitId::Parqueo1,
                entered_at: OffsetDateTime::now_utc(),
                exited_at: None,
                fare_colones: None,
            },
        );
        state.leds.get_mut(&UnitId::Parqueo1).unwrap()[0] = true;

        gateway.save(&state).await.unwrap();
        let loaded = gateway.load().await.unwrap();
        assert_eq!(loaded.active.len(), 1);
        assert_eq!(loaded.active["ABC123"].unit, UnitId::Parqueo1);
        assert_eq!(loaded.leds[&UnitId::Parqueo1], [true, false]);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datos.json");
        let gateway = PersistenceGateway::new(&path);

        gateway.save(&LedgerState::default()).await.unwrap();
        let mut state = LedgerState::default();
        state.stats_total.total_vehiculos = 7;
        gateway.save(&state).await.unwrap();

        let loaded = gateway.load().await.unwrap();
        assert_eq!(loaded.stats_total.total_vehiculos, 7);
        // El temporal no debe quedar huérfano tras el rename.
        assert!(!path.with_extension("json.tmp").exists());
    }
}

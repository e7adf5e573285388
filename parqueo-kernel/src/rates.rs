use serde::Deserialize;
use std::time::Duration;

/// Tasa de respaldo en colones por dólar cuando la consulta falla.
pub const TASA_CAMBIO_DEFECTO: f64 = 500.0;

const RATE_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";
const RATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RateTable {
    rates: std::collections::HashMap<String, f64>,
}

/// Consulta la tasa CRC/USD una sola vez al arranque. Cualquier falla
/// (red, timeout, JSON sin CRC) cae a la tasa de respaldo hasta el
/// próximo reinicio del proceso.
pub async fn fetch_rate() -> f64 {
    fetch_rate_from(RATE_URL).await
}

/// El endpoint va por parámetro para poder apuntar a servicios de prueba.
pub async fn fetch_rate_from(url: &str) -> f64 {
    match fetch_rate_inner(url).await {
        Ok(rate) if rate > 0.0 => {
            log::info!("[rates] tipo de cambio actualizado: ₡{rate:.0} por $1");
            rate
        }
        Ok(rate) => {
            log::warn!("[rates] rate inválido ({rate}), usando valor por defecto");
            TASA_CAMBIO_DEFECTO
        }
        Err(e) => {
            log::warn!("[rates] no se pudo actualizar el tipo de cambio ({e}), usando valor por defecto");
            TASA_CAMBIO_DEFECTO
        }
    }
}

async fn fetch_rate_inner(url: &str) -> anyhow::Result<f64> {
    let client = reqwest::Client::builder().timeout(RATE_TIMEOUT).build()?;
    let table: RateTable = client.get(url).send().await?.json().await?;
    table
        .rates
        .get("CRC")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("respuesta sin tasa CRC"))
}

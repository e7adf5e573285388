use crate::models::UnitId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParqueoConfig {
    pub units: UnitsConf,
    pub http: Option<HttpConf>,
    /// Ruta del snapshot persistido del ledger.
    pub data_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnitsConf {
    pub parqueo1: UnitConf,
    pub parqueo2: UnitConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnitConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub port: u16,
}

impl Default for ParqueoConfig {
    fn default() -> Self {
        // Puertos históricos de los dos controladores (1718/1719).
        Self {
            units: UnitsConf {
                parqueo1: UnitConf { host: "localhost".into(), port: 1718 },
                parqueo2: UnitConf { host: "localhost".into(), port: 1719 },
            },
            http: Some(HttpConf { port: 8080 }),
            data_file: None,
        }
    }
}

impl ParqueoConfig {
    pub fn unit(&self, unit: UnitId) -> &UnitConf {
        match unit {
            UnitId::Parqueo1 => &self.units.parqueo1,
            UnitId::Parqueo2 => &self.units.parqueo2,
        }
    }

    pub fn http_port(&self) -> u16 {
        self.http.as_ref().map(|h| h.port).unwrap_or(8080)
    }

    pub fn data_file(&self) -> &str {
        self.data_file.as_deref().unwrap_or("parqueo_datos.json")
    }
}

impl UnitConf {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub async fn load_config() -> ParqueoConfig {
    let path = std::env::var("PARQUEO_CONFIG").unwrap_or_else(|_| "parqueo.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return ParqueoConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            log::error!("[kernel] config inválida: {e}");
            ParqueoConfig::default()
        })
    } else {
        log::warn!("[kernel] no hay parqueo.yaml, usando config por defecto");
        ParqueoConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let cfg = ParqueoConfig::default();
        assert_eq!(cfg.unit(UnitId::Parqueo1).addr(), "localhost:1718");
        assert_eq!(cfg.unit(UnitId::Parqueo2).addr(), "localhost:1719");
        assert_eq!(cfg.http_port(), 8080);
        assert_eq!(cfg.data_file(), "parqueo_datos.json");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
units:
  parqueo1: { host: "10.99.207.214", port: 1718 }
  parqueo2: { host: "10.99.207.111", port: 1719 }
http: { port: 9090 }
data_file: "/var/lib/parqueo/datos.json"
"#;
        let cfg: ParqueoConfig = serde_yaml::from_str(yaml).expect("yaml válido");
        assert_eq!(cfg.unit(UnitId::Parqueo2).host, "10.99.207.111");
        assert_eq!(cfg.http_port(), 9090);
        assert_eq!(cfg.data_file(), "/var/lib/parqueo/datos.json");
    }
}

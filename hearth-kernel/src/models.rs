/**
 * MODÈLES HEARTH - Payloads échangés avec les nœuds et enregistrements persistés
 *
 * RÔLE : Décodage des rapports entrants (télémétrie, prédictions, seuils),
 * normalisation des timestamps, et types immuables écrits dans le store.
 *
 * Les noms de champs côté fil restent ceux envoyés par les nœuds
 * (`ts`, `sol`, `mese`, `ora`, `nPow`...), les enregistrements persistés
 * utilisent des noms explicites.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

use crate::error::KernelError;

// Au-delà, un epoch numérique est exprimé en millisecondes
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Une liaison (nœud, adresse, ressource) du registre.
/// `resource` vaut `None` pour un nœud enregistré sans ressource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub node_ip: String,
    pub resource: Option<String>,
}

/// Seuils du contrôle anti-starvation, réglables à distance via /starvation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub max_on: i32,
    pub min_on: i32,
    pub load_hour: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { max_on: 8, min_on: 4, load_hour: 23 }
    }
}

/// Mise à jour partielle des seuils (PUT /starvation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ThresholdsPatch {
    pub max_on: Option<i32>,
    pub min_on: Option<i32>,
    pub load_hour: Option<i32>,
}

impl Thresholds {
    /// Remplace uniquement les champs présents dans le patch
    pub fn merge(&mut self, patch: ThresholdsPatch) {
        if let Some(max_on) = patch.max_on {
            self.max_on = max_on;
        }
        if let Some(min_on) = patch.min_on {
            self.min_on = min_on;
        }
        if let Some(load_hour) = patch.load_hour {
            self.load_hour = load_hour;
        }
    }
}

/// Rapport de télémétrie POST /res_data
#[derive(Debug, Deserialize)]
pub struct TelemetryIn {
    pub ts: Value,
    pub sol: f64,
    pub mese: i32,
    pub ora: i32,
    pub temp: f64,
    pub hum: f64,
    pub pow: f64,
}

/// Rapport de prédiction POST /res_prediction
#[derive(Debug, Deserialize)]
pub struct PredictionIn {
    pub ts: Value,
    #[serde(rename = "nPow")]
    pub next_power: f64,
    #[serde(rename = "nSol")]
    pub next_solar: f64,
    pub miss: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub time_sec: i64,
    pub solar: f64,
    pub month: i32,
    pub hour: i32,
    pub temperature: f64,
    pub humidity: f64,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub time_sec: i64,
    pub next_power: f64,
    pub next_solar: f64,
    pub missing: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FurnaceLogEntry {
    pub time_sec: i64,
    pub status: u8,
}

impl TelemetryIn {
    pub fn decode(body: &[u8]) -> Result<Self, KernelError> {
        serde_json::from_slice(body)
            .map_err(|e| KernelError::Validation(format!("invalid telemetry: {e}")))
    }

    pub fn into_record(self) -> Result<TelemetryRecord, KernelError> {
        Ok(TelemetryRecord {
            time_sec: to_epoch_seconds(&self.ts)?,
            solar: self.sol,
            month: self.mese,
            hour: self.ora,
            temperature: self.temp,
            humidity: self.hum,
            power: self.pow,
        })
    }
}

impl PredictionIn {
    pub fn decode(body: &[u8]) -> Result<Self, KernelError> {
        serde_json::from_slice(body)
            .map_err(|e| KernelError::Validation(format!("invalid prediction: {e}")))
    }

    pub fn into_record(self) -> Result<PredictionRecord, KernelError> {
        Ok(PredictionRecord {
            time_sec: to_epoch_seconds(&self.ts)?,
            next_power: self.next_power,
            next_solar: self.next_solar,
            missing: self.miss,
        })
    }
}

/// Horloge murale en secondes depuis l'epoch (sync des nœuds via GET /register)
pub fn now_epoch_seconds() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Convertit un timestamp reçu d'un nœud en secondes epoch UTC.
///
/// Formats acceptés :
/// - nombre ou chaîne de chiffres (secondes, ou millisecondes si > 10^12)
/// - `YYYY-MM-DD HH:MM:SS` (UTC)
/// - RFC 3339 (`2025-06-12T14:23:00Z`, avec ou sans offset)
pub fn to_epoch_seconds(raw: &Value) -> Result<i64, KernelError> {
    let invalid = || KernelError::Validation(format!("invalid timestamp: {raw}"));

    let epoch = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() && s.trim().chars().all(|c| c.is_ascii_digit()) => {
            s.trim().parse::<f64>().ok()
        }
        Value::String(_) => None,
        _ => return Err(invalid()),
    };

    if let Some(mut epoch) = epoch {
        if epoch > EPOCH_MILLIS_THRESHOLD {
            epoch /= 1000.0;
        }
        return Ok(epoch as i64);
    }

    let Value::String(s) = raw else {
        return Err(invalid());
    };
    let s = s.trim();

    if let Ok(dt) = PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]")) {
        return Ok(dt.assume_utc().unix_timestamp());
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt.unix_timestamp());
    }
    // ISO sans offset : considéré UTC
    if let Ok(dt) = PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]")) {
        return Ok(dt.assume_utc().unix_timestamp());
    }

    Err(invalid())
}

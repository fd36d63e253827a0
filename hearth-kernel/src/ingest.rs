/**
 * INGESTION - Rapports poussés par les nœuds vers le coordinateur
 *
 * RÔLE : Décodage, persistance et effets de bord des rapports reçus sur
 * /res_data (télémétrie), /res_prediction et /starvation.
 *
 * FONCTIONNEMENT :
 * - Télémétrie : décodée, persistée, puis tick du contrôleur sur l'heure `ora`
 * - Une télémétrie non persistée ne déclenche jamais de tick
 * - Prédiction : décodée et persistée, sans effet sur le contrôle
 */
use tracing::{info, warn};

use crate::controller::FurnaceController;
use crate::error::KernelError;
use crate::models::{PredictionIn, PredictionRecord, TelemetryIn, TelemetryRecord, ThresholdsPatch};
use crate::store::Store;

pub async fn ingest_telemetry(
    body: &[u8],
    store: &dyn Store,
    controller: &FurnaceController,
) -> Result<TelemetryRecord, KernelError> {
    let record = TelemetryIn::decode(body)
        .and_then(TelemetryIn::into_record)
        .inspect_err(|e| warn!("[ingest] telemetry rejected: {e}"))?;

    store.insert_telemetry(&record)?;
    info!(
        "[ingest] telemetry t={} hour={} power={} solar={}",
        record.time_sec, record.hour, record.power, record.solar
    );

    controller.tick(record.hour).await;
    Ok(record)
}

pub fn ingest_prediction(body: &[u8], store: &dyn Store) -> Result<PredictionRecord, KernelError> {
    let record = PredictionIn::decode(body)
        .and_then(PredictionIn::into_record)
        .inspect_err(|e| warn!("[ingest] prediction rejected: {e}"))?;

    store.insert_prediction(&record)?;
    info!(
        "[ingest] prediction t={} next_power={} next_solar={} missing={}",
        record.time_sec, record.next_power, record.next_solar, record.missing
    );
    Ok(record)
}

/// Corps de PUT /starvation : sous-ensemble de {max_on, min_on, load_hour}
pub fn decode_thresholds_patch(body: &[u8]) -> Result<ThresholdsPatch, KernelError> {
    serde_json::from_slice(body).map_err(|e| KernelError::Validation(format!("invalid thresholds: {e}")))
}

/**
 * API HTTP HEARTH - Ressources exposées par le coordinateur
 *
 * RÔLE :
 * Point d'entrée des nœuds du réseau domotique : enregistrement et découverte,
 * remontée de télémétrie et de prédictions, réglage des seuils du four.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, une route par ressource ; chaque route n'implémente que
 *   les méthodes qu'elle supporte (405 sinon)
 * - Adresse du nœud = IP source de la connexion (ConnectInfo)
 * - /res_data et /res_prediction répondent en texte brut (OK / ERROR),
 *   les autres ressources en JSON
 * - Routes d'administration : /health, /nodes, /status
 */
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::controller::{ControllerSnapshot, FurnaceController};
use crate::error::KernelError;
use crate::ingest::{decode_thresholds_patch, ingest_prediction, ingest_telemetry};
use crate::models::{now_epoch_seconds, NodeRegistration, Thresholds};
use crate::registry::{RegisterRequest, SharedRegistry};
use crate::store::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub controller: Arc<FurnaceController>,
    pub store: SharedStore,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/register", get(get_timestamp).post(register))
        .route("/lookup", get(lookup))
        .route("/res_data", post(post_telemetry))
        .route("/res_prediction", post(post_prediction))
        .route("/starvation", get(get_thresholds).put(put_thresholds))
        .route("/nodes", get(list_nodes))
        .route("/status", get(get_status))
        .with_state(app_state)
}

/// IP source du nœud (IPv4 mappée en IPv6 ramenée à sa forme IPv4)
fn peer_address(peer: SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Réponse texte des ressources de données : seul le code compte pour les nœuds
fn plain_reply<T>(result: Result<T, KernelError>) -> (StatusCode, &'static str) {
    match result {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => (e.status(), "ERROR"),
    }
}

async fn get_timestamp() -> Json<Value> {
    Json(json!({ "timestamp": now_epoch_seconds().to_string() }))
}

async fn register(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<&'static str, KernelError> {
    let request = RegisterRequest::decode(&body)?;
    app.registry.register(&request.id, &peer_address(peer), &request.resources)?;
    Ok("OK")
}

#[derive(Deserialize)]
struct LookupQuery {
    res: Option<String>,
}

async fn lookup(State(app): State<AppState>, Query(q): Query<LookupQuery>) -> Result<Json<Value>, KernelError> {
    let resource = q
        .res
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| KernelError::Validation("missing res query parameter".into()))?;
    let address = app.registry.resolve(&resource)?;
    Ok(Json(json!({ "ip": address })))
}

async fn post_telemetry(State(app): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    plain_reply(ingest_telemetry(&body, app.store.as_ref(), &app.controller).await)
}

async fn post_prediction(State(app): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    plain_reply(ingest_prediction(&body, app.store.as_ref()))
}

async fn get_thresholds(State(app): State<AppState>) -> Json<Thresholds> {
    Json(app.controller.thresholds())
}

async fn put_thresholds(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, KernelError> {
    let patch = decode_thresholds_patch(&body)?;
    let t = app.controller.update_thresholds(patch);
    Ok(Json(json!({
        "status": "updated",
        "max_on": t.max_on,
        "min_on": t.min_on,
        "load_hour": t.load_hour,
    })))
}

async fn list_nodes(State(app): State<AppState>) -> Json<Vec<NodeRegistration>> {
    Json(app.registry.bindings())
}

async fn get_status(State(app): State<AppState>) -> Json<ControllerSnapshot> {
    Json(app.controller.snapshot())
}

/**
 * OBSERVATION DES NŒUDS - Suivi de l'état distant du four
 *
 * RÔLE :
 * Maintient à jour l'état observé du contrôleur (four allumé, contrôle
 * automatique actif) à partir des notifications poussées par les nœuds.
 *
 * FONCTIONNEMENT :
 * - Une tâche par ressource observée (/res_furnace, /res_threshold)
 * - Attente événementielle de l'enregistrement de la ressource, puis abonnement
 * - Notifications consommées dans l'ordre via un canal borné
 * - Payload invalide : loggé et ignoré, l'état n'est pas modifié
 * - Abonnement unique : pas de ré-armement si le nœud change d'adresse
 * - Log on/off du four toutes les `furnace_log_interval` une fois abonné
 */
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::{FurnaceController, FURNACE_RESOURCE, THRESHOLD_RESOURCE};
use crate::error::KernelError;
use crate::models::{now_epoch_seconds, FurnaceLogEntry};
use crate::registry::SharedRegistry;
use crate::store::SharedStore;
use crate::transport::SharedTransport;

// Notifications en attente par abonnement
const NOTIFICATION_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedResource {
    Furnace,
    Threshold,
}

impl WatchedResource {
    pub const ALL: [WatchedResource; 2] = [WatchedResource::Furnace, WatchedResource::Threshold];

    pub fn path(self) -> &'static str {
        match self {
            WatchedResource::Furnace => FURNACE_RESOURCE,
            WatchedResource::Threshold => THRESHOLD_RESOURCE,
        }
    }

    fn field(self) -> &'static str {
        match self {
            WatchedResource::Furnace => "furnace_state",
            WatchedResource::Threshold => "auto_furnace_ctrl",
        }
    }

    /// Extrait le drapeau on/off d'une notification (entier ou booléen)
    pub fn decode(self, payload: &[u8]) -> Result<bool, KernelError> {
        let field = self.field();
        let data: Value = serde_json::from_slice(payload)
            .map_err(|e| KernelError::Validation(format!("{} notification is not JSON: {e}", self.path())))?;

        match data.get(field) {
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| KernelError::Validation(format!("{field} is not an integer: {n}"))),
            Some(other) => Err(KernelError::Validation(format!("{field} has unexpected value {other}"))),
            None => Err(KernelError::Validation(format!("{field} missing from {} notification", self.path()))),
        }
    }

    fn apply(self, controller: &FurnaceController, flag: bool) {
        match self {
            WatchedResource::Furnace => controller.observe_furnace(flag),
            WatchedResource::Threshold => controller.observe_auto_control(flag),
        }
    }
}

/// Lance une tâche d'observation par ressource surveillée.
/// Le log du four démarre dès que l'abonnement au four est établi.
pub fn spawn_observers(
    registry: SharedRegistry,
    transport: SharedTransport,
    controller: Arc<FurnaceController>,
    store: SharedStore,
    log_interval: Duration,
) -> Vec<JoinHandle<()>> {
    WatchedResource::ALL
        .into_iter()
        .map(|resource| {
            let registry = registry.clone();
            let transport = transport.clone();
            let controller = controller.clone();
            let store = store.clone();
            tokio::spawn(async move {
                let Some(notifications) = subscribe(resource, &registry, &transport).await else {
                    return;
                };
                if resource == WatchedResource::Furnace {
                    spawn_furnace_logger(controller.clone(), store, log_interval);
                }
                consume(resource, notifications, &controller).await;
            })
        })
        .collect()
}

async fn subscribe(
    resource: WatchedResource,
    registry: &SharedRegistry,
    transport: &SharedTransport,
) -> Option<mpsc::Receiver<Vec<u8>>> {
    let address = registry.wait_for(resource.path()).await?;
    info!("[observer] {} available on [{address}], subscribing", resource.path());

    let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
    match transport.observe(&address, resource.path(), tx).await {
        Ok(()) => Some(rx),
        Err(e) => {
            error!("[observer] cannot observe {} on [{address}]: {e}", resource.path());
            None
        }
    }
}

async fn consume(
    resource: WatchedResource,
    mut notifications: mpsc::Receiver<Vec<u8>>,
    controller: &FurnaceController,
) {
    while let Some(payload) = notifications.recv().await {
        match resource.decode(&payload) {
            Ok(flag) => {
                debug!("[observer] {} -> {}", resource.path(), u8::from(flag));
                resource.apply(controller, flag);
            }
            Err(e) => warn!("[observer] discarding notification: {e}"),
        }
    }
    info!("[observer] subscription to {} closed", resource.path());
}

/// Écrit périodiquement l'état on/off du four dans le store
pub fn spawn_furnace_logger(
    controller: Arc<FurnaceController>,
    store: SharedStore,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let entry = FurnaceLogEntry {
                time_sec: now_epoch_seconds(),
                status: u8::from(controller.furnace_on()),
            };
            if let Err(e) = store.insert_furnace_log(&entry) {
                error!("[observer] furnace log write failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ObservedRemoteState;
    use crate::models::Thresholds;
    use crate::registry::NodeRegistry;
    use crate::store::Stream;
    use crate::testing::{MemoryStore, RecordingTransport};

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: SharedRegistry,
        transport: Arc<RecordingTransport>,
        controller: Arc<FurnaceController>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let registry: SharedRegistry = Arc::new(NodeRegistry::new(store.clone()));
        let transport = Arc::new(RecordingTransport::default());
        let controller = Arc::new(FurnaceController::new(
            Thresholds::default(),
            registry.clone(),
            transport.clone(),
            Duration::from_secs(5),
        ));
        Fixture { store, registry, transport, controller }
    }

    fn start(f: &Fixture) {
        let period = Duration::from_secs(15);
        spawn_observers(f.registry.clone(), f.transport.clone(), f.controller.clone(), f.store.clone(), period);
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn decodes_integer_and_boolean_flags() {
        assert!(WatchedResource::Furnace.decode(br#"{"furnace_state":1}"#).unwrap());
        assert!(!WatchedResource::Furnace.decode(br#"{"furnace_state":0}"#).unwrap());
        assert!(WatchedResource::Threshold.decode(br#"{"auto_furnace_ctrl":true,"th":20}"#).unwrap());
    }

    #[test]
    fn rejects_malformed_notifications() {
        let rejected: [&[u8]; 5] = [
            b"garbage",
            b"[1]",
            br#"{"other":1}"#,
            br#"{"furnace_state":"on"}"#,
            br#"{"furnace_state":0.5}"#,
        ];
        for payload in rejected {
            assert!(WatchedResource::Furnace.decode(payload).is_err(), "{}", String::from_utf8_lossy(payload));
        }
    }

    #[tokio::test]
    async fn subscribes_once_resources_are_registered() {
        let f = fixture();
        start(&f);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.transport.subscriptions().is_empty());

        f.registry.register("furnace", "fd00::3", &["/res_furnace".to_string()]).unwrap();
        f.registry.register("edge", "fd00::2", &["/res_threshold".to_string()]).unwrap();

        let transport = f.transport.clone();
        eventually(move || transport.subscriptions().len() == 2).await;
        let subscriptions = f.transport.subscriptions();
        assert!(subscriptions.contains(&("fd00::3".to_string(), "/res_furnace".to_string())));
        assert!(subscriptions.contains(&("fd00::2".to_string(), "/res_threshold".to_string())));
    }

    #[tokio::test]
    async fn notifications_update_observed_state() {
        let f = fixture();
        f.registry.register("furnace", "fd00::3", &["/res_furnace".to_string()]).unwrap();
        f.registry.register("edge", "fd00::2", &["/res_threshold".to_string()]).unwrap();
        start(&f);

        let transport = f.transport.clone();
        eventually(move || transport.subscriptions().len() == 2).await;

        f.transport.notify("/res_furnace", br#"{"furnace_state":1}"#).await;
        f.transport.notify("/res_threshold", br#"{"auto_furnace_ctrl":0}"#).await;

        let controller = f.controller.clone();
        eventually(move || {
            controller.observed()
                == ObservedRemoteState { furnace_on: Some(true), automatic_control_enabled: Some(false) }
        })
        .await;

        // payload invalide puis valide : seul le second est appliqué
        f.transport.notify("/res_furnace", b"{broken").await;
        f.transport.notify("/res_furnace", br#"{"furnace_state":0}"#).await;
        let controller = f.controller.clone();
        eventually(move || controller.observed().furnace_on == Some(false)).await;
        assert_eq!(f.controller.observed().automatic_control_enabled, Some(false));
    }

    #[tokio::test]
    async fn malformed_notification_leaves_state_untouched() {
        let f = fixture();
        f.registry.register("furnace", "fd00::3", &["/res_furnace".to_string()]).unwrap();
        start(&f);

        let transport = f.transport.clone();
        eventually(move || transport.subscriptions().len() == 1).await;

        f.transport.notify("/res_furnace", br#"{"furnace_state":"maybe"}"#).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(f.controller.observed(), ObservedRemoteState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn furnace_logger_writes_cached_state() {
        let f = fixture();
        f.controller.observe_furnace(true);
        let logger = spawn_furnace_logger(f.controller.clone(), f.store.clone(), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(16)).await;
        let entries = f.store.records(Stream::FurnaceLog);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e["status"] == 1));

        f.controller.observe_furnace(false);
        tokio::time::sleep(Duration::from_secs(15)).await;
        let entries = f.store.records(Stream::FurnaceLog);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2]["status"], 0);
        logger.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn furnace_logger_survives_write_failures() {
        let f = fixture();
        f.store.fail_writes(true);
        let logger = spawn_furnace_logger(f.controller.clone(), f.store.clone(), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(f.store.records(Stream::FurnaceLog).is_empty());

        f.store.fail_writes(false);
        tokio::time::sleep(Duration::from_secs(15)).await;
        let entries = f.store.records(Stream::FurnaceLog);
        assert_eq!(entries.len(), 1);
        // état inconnu = éteint
        assert_eq!(entries[0]["status"], 0);
        logger.abort();
    }
}

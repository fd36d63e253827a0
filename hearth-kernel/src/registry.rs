/**
 * REGISTRE DES NŒUDS - Découverte des ressources du réseau domotique
 *
 * RÔLE : Table en mémoire ressource -> adresse du nœud qui la sert,
 * alimentée par POST /register et interrogée par GET /lookup.
 *
 * FONCTIONNEMENT :
 * - Append-only pour toute la durée du processus (aucune expiration)
 * - Idempotent par adresse source : un nœud déjà connu est ignoré
 * - Lookup : première liaison enregistrée pour la ressource
 * - wait_for : attente événementielle de l'apparition d'une ressource
 *   (canal watch signalé à chaque enregistrement)
 * - Chaque liaison est miroitée dans le store (flux nodes)
 */
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::KernelError;
use crate::models::NodeRegistration;
use crate::store::SharedStore;

/// Ressources servies par le coordinateur lui-même, toujours découvrables
pub const SERVER_RESOURCES: [&str; 2] = ["/res_data", "/res_prediction"];
pub const SERVER_NODE_ID: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Nombre de liaisons ajoutées
    Registered(usize),
    AlreadyRegistered,
}

/// Corps décodé de POST /register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub id: String,
    pub resources: Vec<String>,
}

impl RegisterRequest {
    pub fn decode(body: &[u8]) -> Result<Self, KernelError> {
        let data: Value = serde_json::from_slice(body)
            .map_err(|e| KernelError::Validation(format!("invalid registration body: {e}")))?;

        let id = match data.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            _ => return Err(KernelError::Validation("missing node id".into())),
        };

        let resources = match data.get("resources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| KernelError::Validation(format!("invalid resource path: {item}")))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(KernelError::Validation(format!("resources must be a list, got {other}")))
            }
        };

        Ok(Self { id, resources })
    }
}

pub struct NodeRegistry {
    nodes: Mutex<Vec<NodeRegistration>>,
    // nombre de liaisons, publié à chaque ajout
    changes: watch::Sender<usize>,
    store: SharedStore,
}

pub type SharedRegistry = Arc<NodeRegistry>;

impl NodeRegistry {
    pub fn new(store: SharedStore) -> Self {
        let (changes, _) = watch::channel(0);
        Self { nodes: Mutex::new(Vec::new()), changes, store }
    }

    /// Registre avec les ressources du coordinateur pré-enregistrées
    pub fn with_server_resources(store: SharedStore, server_address: &str) -> Result<Self, KernelError> {
        let registry = Self::new(store);
        let resources: Vec<String> = SERVER_RESOURCES.iter().map(|r| r.to_string()).collect();
        registry.register(SERVER_NODE_ID, server_address, &resources)?;
        Ok(registry)
    }

    /// Enregistre un nœud et ses ressources.
    ///
    /// Sans effet si l'adresse est déjà connue. Une liste vide ajoute une
    /// liaison sans ressource. Retourne une erreur de persistance si le miroir
    /// échoue (la liaison en mémoire reste valide).
    pub fn register(
        &self,
        node_id: &str,
        address: &str,
        resources: &[String],
    ) -> Result<RegisterOutcome, KernelError> {
        if node_id.trim().is_empty() {
            return Err(KernelError::Validation("missing node id".into()));
        }

        let appended = {
            let mut nodes = self.nodes.lock();
            if nodes.iter().any(|n| n.node_ip == address) {
                info!("[registry] node already registered from [{address}], ignoring {node_id}");
                return Ok(RegisterOutcome::AlreadyRegistered);
            }

            let mut entries: Vec<NodeRegistration> = Vec::new();
            for res in resources {
                if entries.iter().any(|e| e.resource.as_deref() == Some(res.as_str())) {
                    continue;
                }
                entries.push(NodeRegistration {
                    node_id: node_id.to_string(),
                    node_ip: address.to_string(),
                    resource: Some(res.clone()),
                });
            }
            if entries.is_empty() {
                entries.push(NodeRegistration {
                    node_id: node_id.to_string(),
                    node_ip: address.to_string(),
                    resource: None,
                });
            }

            nodes.extend(entries.iter().cloned());
            self.changes.send_replace(nodes.len());
            entries
        };

        info!("[registry] node {node_id} registered from [{address}] ({} bindings)", appended.len());
        for entry in &appended {
            self.store.insert_node(entry)?;
        }
        Ok(RegisterOutcome::Registered(appended.len()))
    }

    /// Adresse de la première liaison enregistrée pour la ressource
    pub fn lookup(&self, resource: &str) -> Option<String> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.resource.as_deref() == Some(resource))
            .map(|n| n.node_ip.clone())
    }

    /// Comme `lookup`, avec un not-found explicite
    pub fn resolve(&self, resource: &str) -> Result<String, KernelError> {
        self.lookup(resource)
            .ok_or_else(|| KernelError::NotFound(format!("no node serves {resource}")))
    }

    /// Attend qu'une ressource soit enregistrée et retourne son adresse.
    /// `None` uniquement si le registre est détruit pendant l'attente.
    pub async fn wait_for(&self, resource: &str) -> Option<String> {
        // abonnement avant la vérification : aucun enregistrement ne peut être manqué
        let mut changes = self.changes.subscribe();
        loop {
            if let Some(address) = self.lookup(resource) {
                return Some(address);
            }
            debug!("[registry] waiting for {resource}");
            if changes.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Snapshot de toutes les liaisons, dans l'ordre d'enregistrement
    pub fn bindings(&self) -> Vec<NodeRegistration> {
        self.nodes.lock().clone()
    }
}

//! Doublures de test : store en mémoire et transport enregistreur.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::store::{Store, StoreError, Stream};
use crate::transport::{Transport, TransportError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<(Stream, Value)>>,
    fail: AtomicBool,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self, stream: Stream) -> Vec<Value> {
        self.records
            .lock()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Store for MemoryStore {
    fn append(&self, stream: Stream, record: Value) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "store offline")));
        }
        self.records.lock().push((stream, record));
        Ok(())
    }
}

/// Commande PUT capturée par le transport de test
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub address: String,
    pub resource: String,
    pub payload: Value,
}

/// Comportement du nœud simulé pour les commandes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeBehaviour {
    #[default]
    Ack,
    Reject,
    Hang,
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentCommand>>,
    behaviour: Mutex<NodeBehaviour>,
    subscriptions: Mutex<Vec<(String, String, mpsc::Sender<Vec<u8>>)>>,
}

impl RecordingTransport {
    pub fn with_behaviour(behaviour: NodeBehaviour) -> Self {
        let transport = Self::default();
        *transport.behaviour.lock() = behaviour;
        transport
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.sent.lock().iter().map(|c| c.payload.clone()).collect()
    }

    /// (adresse, ressource) de chaque abonnement établi
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscriptions.lock().iter().map(|(a, r, _)| (a.clone(), r.clone())).collect()
    }

    /// Pousse une notification sur l'abonnement à `resource`
    pub async fn notify(&self, resource: &str, payload: &[u8]) {
        let sink = self
            .subscriptions
            .lock()
            .iter()
            .find(|(_, r, _)| r == resource)
            .map(|(_, _, s)| s.clone())
            .expect("no subscription for resource");
        sink.send(payload.to_vec()).await.expect("notification consumer gone");
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn put(&self, address: &str, resource: &str, payload: &Value) -> Result<(), TransportError> {
        self.sent.lock().push(SentCommand {
            address: address.to_string(),
            resource: resource.to_string(),
            payload: payload.clone(),
        });
        let behaviour = *self.behaviour.lock();
        match behaviour {
            NodeBehaviour::Ack => Ok(()),
            NodeBehaviour::Reject => Err(TransportError::Status(400)),
            NodeBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn observe(
        &self,
        address: &str,
        resource: &str,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.subscriptions.lock().push((address.to_string(), resource.to_string(), sink));
        Ok(())
    }
}

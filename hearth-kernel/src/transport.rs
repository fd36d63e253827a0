/**
 * TRANSPORT - Passerelle vers les nœuds distants
 *
 * RÔLE :
 * Envoi des commandes d'override (PUT) et abonnement aux ressources observables
 * des nœuds (état du four, contrôle automatique).
 *
 * FONCTIONNEMENT :
 * - Commandes : PUT JSON sur http://<nœud>:<http_port>/<ressource>
 * - Observation : GET initial, puis abonnement MQTT sur le broker du nœud,
 *   topic `<prefix>/<ressource>` ; chaque publish porte le même JSON que le GET
 * - Les notifications sont poussées dans un canal borné, dans l'ordre d'arrivée
 */
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::NodesConf;

// Capacité du canal de requêtes du client MQTT
const MQTT_CHANNEL_CAPACITY: usize = 10;

// Pause avant nouvelle tentative après une erreur du broker
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no response before timeout")]
    Timeout,
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error("node answered with status {0}")]
    Status(u16),
    #[error("subscription failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Http(e)
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Envoie une commande à une ressource d'un nœud et attend son accusé
    async fn put(&self, address: &str, resource: &str, payload: &Value) -> Result<(), TransportError>;

    /// S'abonne à une ressource observable ; la valeur initiale puis chaque
    /// notification sont poussées dans `sink` jusqu'à sa fermeture.
    async fn observe(
        &self,
        address: &str,
        resource: &str,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Formate l'hôte pour une URL (adresse IPv6 entre crochets)
fn url_host(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}

pub fn resource_url(address: &str, port: u16, resource: &str) -> String {
    format!("http://{}:{port}/{}", url_host(address), resource.trim_start_matches('/'))
}

pub fn resource_topic(prefix: &str, resource: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), resource.trim_start_matches('/'))
}

pub struct NodeTransport {
    http: reqwest::Client,
    conf: NodesConf,
}

impl NodeTransport {
    pub fn new(conf: NodesConf) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(conf.command_timeout()).build()?;
        Ok(Self { http, conf })
    }

    async fn get(&self, address: &str, resource: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.http.get(resource_url(address, self.conf.http_port, resource)).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Transport for NodeTransport {
    async fn put(&self, address: &str, resource: &str, payload: &Value) -> Result<(), TransportError> {
        let url = resource_url(address, self.conf.http_port, resource);
        let response = self.http.put(&url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        debug!("[transport] PUT {url} -> {status}");
        Ok(())
    }

    async fn observe(
        &self,
        address: &str,
        resource: &str,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let topic = resource_topic(&self.conf.topic_prefix, resource);

        let client_id = format!("hearth-kernel-{}", topic.replace('/', "-"));
        let mut opts = MqttOptions::new(client_id, address, self.conf.broker_port);
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(opts, MQTT_CHANNEL_CAPACITY);
        client.subscribe(topic.as_str(), QoS::AtMostOnce).await?;

        // Valeur initiale de la ressource, comme un GET observe
        match self.get(address, resource).await {
            Ok(initial) => {
                if sink.send(initial).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!("[transport] initial GET {resource} on [{address}] failed: {e}"),
        }

        info!("[transport] observing {resource} on [{address}] (topic {topic})");
        tokio::spawn(run_subscriber(client, eventloop, topic, sink));
        Ok(())
    }
}

async fn run_subscriber(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    sink: mpsc::Sender<Vec<u8>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == topic => {
                if sink.send(p.payload.to_vec()).await.is_err() {
                    warn!("[transport] notification consumer gone, stop observing {topic}");
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                // session non persistante : réabonnement à chaque (re)connexion
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    warn!("[transport] resubscribe to {topic} failed: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[transport] MQTT error on {topic}: {e:?}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    drop(client);
}

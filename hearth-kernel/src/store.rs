/**
 * STORE - Passerelle de persistance append-only du coordinateur
 *
 * RÔLE :
 * Journalise durablement les quatre flux d'enregistrements : miroir du registre
 * des nœuds, télémétrie, prédictions et log on/off du four.
 *
 * FONCTIONNEMENT :
 * - Store trait = contrat minimal (append d'un enregistrement JSON sur un flux)
 * - Méthodes typées par défaut (insert_node, insert_telemetry...) au-dessus d'append
 * - FileStore = un fichier JSON lines par flux dans data_dir
 *
 * Les enregistrements ne sont jamais relus par le kernel : la lecture est
 * réservée aux outils de reporting externes.
 */
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::models::{FurnaceLogEntry, NodeRegistration, PredictionRecord, TelemetryRecord};

/// Erreurs possibles lors des écritures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flux d'enregistrements persistés
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Nodes,
    Telemetry,
    Predictions,
    FurnaceLog,
}

impl Stream {
    pub const ALL: [Stream; 4] = [Stream::Nodes, Stream::Telemetry, Stream::Predictions, Stream::FurnaceLog];

    pub fn file_name(self) -> &'static str {
        match self {
            Stream::Nodes => "nodes.jsonl",
            Stream::Telemetry => "telemetry.jsonl",
            Stream::Predictions => "predictions.jsonl",
            Stream::FurnaceLog => "furnace_log.jsonl",
        }
    }
}

pub trait Store: Send + Sync {
    /// Ajoute un enregistrement en fin de flux, de manière durable
    fn append(&self, stream: Stream, record: serde_json::Value) -> Result<(), StoreError>;

    fn insert_node(&self, node: &NodeRegistration) -> Result<(), StoreError> {
        self.append(Stream::Nodes, to_value(node)?)
    }

    fn insert_telemetry(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        self.append(Stream::Telemetry, to_value(record)?)
    }

    fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        self.append(Stream::Predictions, to_value(record)?)
    }

    fn insert_furnace_log(&self, entry: &FurnaceLogEntry) -> Result<(), StoreError> {
        self.append(Stream::FurnaceLog, to_value(entry)?)
    }
}

pub type SharedStore = Arc<dyn Store>;

fn to_value<T: Serialize>(record: &T) -> Result<serde_json::Value, StoreError> {
    Ok(serde_json::to_value(record)?)
}

/// Store fichier : une ligne JSON par enregistrement
pub struct FileStore {
    dir: PathBuf,
    // sérialise les appends concurrents (pas de lignes entrelacées)
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Ouvre (et crée si besoin) le dossier de données.
    /// Avec `reset`, les flux existants sont vidés.
    pub fn open<P: Into<PathBuf>>(dir: P, reset: bool) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self { dir, write_lock: Mutex::new(()) };
        if reset {
            store.reset()?;
        }
        info!("[store] file store ready at {:?} (reset: {reset})", store.dir);
        Ok(store)
    }

    pub fn path(&self, stream: Stream) -> PathBuf {
        self.dir.join(stream.file_name())
    }

    fn reset(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        for stream in Stream::ALL {
            fs::write(self.path(stream), "")?;
        }
        Ok(())
    }
}

impl Store for FileStore {
    fn append(&self, stream: Stream, record: serde_json::Value) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(self.path(stream))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/**
 * CONTRÔLEUR ANTI-STARVATION DU FOUR
 *
 * RÔLE :
 * Garantit au four un temps d'allumage borné sur une fenêtre glissante de 24h :
 * jamais plus de `max_on` heures (gaspillage), jamais moins de `min_on` heures
 * (sous-chauffe). Le contrôle automatique du nœud edge garde la main le reste
 * du temps et n'est préempté que le nombre d'heures strictement nécessaire.
 *
 * FONCTIONNEMENT :
 * - Un tick par rapport de télémétrie, indexé sur l'heure `h` du rapport
 * - Ordre d'évaluation : recharge, historique, compte à rebours, max-on, min-on
 * - L'heure d'allumage forcé est choisie pour que l'override se termine
 *   exactement à `load_hour`
 * - État commis sous verrou, commandes envoyées ensuite (fire-and-forget,
 *   timeout borné, aucun rollback en cas d'échec)
 */
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::KernelError;
use crate::models::{Thresholds, ThresholdsPatch};
use crate::registry::SharedRegistry;
use crate::state::{new_state, Shared};
use crate::transport::{SharedTransport, TransportError};

pub const HISTORY_HOURS: usize = 24;
pub const FURNACE_RESOURCE: &str = "/res_furnace";
pub const THRESHOLD_RESOURCE: &str = "/res_threshold";

/// Commande d'override envoyée à un nœud distant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// PUT /res_threshold {"auto_furnace_ctrl": 0|1}
    SetAutoControl(bool),
    /// PUT /res_furnace {"furnace_state": 0|1}
    SetFurnace(bool),
}

impl Command {
    pub fn resource(self) -> &'static str {
        match self {
            Command::SetAutoControl(_) => THRESHOLD_RESOURCE,
            Command::SetFurnace(_) => FURNACE_RESOURCE,
        }
    }

    pub fn payload(self) -> Value {
        match self {
            Command::SetAutoControl(enabled) => json!({ "auto_furnace_ctrl": u8::from(enabled) }),
            Command::SetFurnace(on) => json!({ "furnace_state": u8::from(on) }),
        }
    }
}

/// Dernier état connu des ressources observées ; `None` tant qu'aucune
/// notification n'est arrivée.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObservedRemoteState {
    pub furnace_on: Option<bool>,
    pub automatic_control_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarvationState {
    // plus récent en dernier
    history: [bool; HISTORY_HOURS],
    pub pending_override_hours: u32,
    pub thresholds: Thresholds,
    pub max_reached: bool,
    pub saved_auto_ctrl: bool,
}

impl StarvationState {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            history: [false; HISTORY_HOURS],
            pending_override_hours: 0,
            thresholds,
            max_reached: false,
            saved_auto_ctrl: true,
        }
    }

    pub fn history(&self) -> &[bool; HISTORY_HOURS] {
        &self.history
    }

    pub fn total_on(&self) -> usize {
        self.history.iter().filter(|on| **on).count()
    }

    fn record_hour(&mut self, on: bool) {
        self.history.rotate_left(1);
        self.history[HISTORY_HOURS - 1] = on;
    }

    /// Avance la machine d'un tick horaire et retourne les commandes à émettre,
    /// dans l'ordre d'envoi.
    pub fn advance(&mut self, hour: i32, observed: &ObservedRemoteState) -> Vec<Command> {
        let t = self.thresholds;

        // four rechargé : nouvelle fenêtre de 24h
        if hour == t.load_hour {
            self.history = [false; HISTORY_HOURS];
        }
        self.record_hour(observed.furnace_on.unwrap_or(false));

        if self.pending_override_hours > 0 {
            self.pending_override_hours -= 1;
            if self.pending_override_hours == 0 {
                return vec![Command::SetAutoControl(self.saved_auto_ctrl)];
            }
            return Vec::new();
        }

        let total_on = self.total_on() as i64;
        if total_on >= i64::from(t.max_on) {
            self.max_reached = true;
            return vec![Command::SetAutoControl(false), Command::SetFurnace(false)];
        }

        let remaining = i64::from(t.min_on) - total_on;
        let must_on = (i64::from(t.load_hour) - remaining).rem_euclid(HISTORY_HOURS as i64);
        if i64::from(hour) == must_on && remaining > 0 {
            self.pending_override_hours = u32::try_from(remaining).unwrap_or(u32::MAX);
            self.saved_auto_ctrl = observed.automatic_control_enabled.unwrap_or(true);
            return vec![Command::SetAutoControl(false), Command::SetFurnace(true)];
        }

        if self.max_reached {
            self.max_reached = false;
            return vec![Command::SetAutoControl(true)];
        }

        Vec::new()
    }
}

/// Vue en lecture seule pour GET /status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub observed: ObservedRemoteState,
    pub history: Vec<u8>,
    pub total_on: usize,
    pub pending_override_hours: u32,
    pub max_reached: bool,
    pub thresholds: Thresholds,
}

#[derive(Debug)]
struct ControlState {
    starvation: StarvationState,
    observed: ObservedRemoteState,
}

pub struct FurnaceController {
    state: Shared<ControlState>,
    registry: SharedRegistry,
    transport: SharedTransport,
    command_timeout: Duration,
}

impl FurnaceController {
    pub fn new(
        thresholds: Thresholds,
        registry: SharedRegistry,
        transport: SharedTransport,
        command_timeout: Duration,
    ) -> Self {
        Self {
            state: new_state(ControlState {
                starvation: StarvationState::new(thresholds),
                observed: ObservedRemoteState::default(),
            }),
            registry,
            transport,
            command_timeout,
        }
    }

    /// Tick horaire déclenché par un rapport de télémétrie
    pub async fn tick(&self, hour: i32) -> Vec<Command> {
        let commands = {
            let mut state = self.state.lock();
            let observed = state.observed;
            state.starvation.advance(hour, &observed)
        };
        debug!("[furnace] tick hour={hour} -> {commands:?}");
        self.dispatch(&commands).await;
        commands
    }

    async fn dispatch(&self, commands: &[Command]) {
        for command in commands {
            match self.send(*command).await {
                Ok(address) => info!("[furnace] sent {command:?} to [{address}]"),
                Err(KernelError::NotFound(e)) => warn!("[furnace] {e}, cannot send {command:?}"),
                Err(e) => error!("[furnace] {command:?} failed: {e}"),
            }
        }
    }

    /// Envoie une commande au nœud lié à sa ressource, retourne son adresse
    pub async fn send(&self, command: Command) -> Result<String, KernelError> {
        let resource = command.resource();
        let address = self.registry.resolve(resource)?;
        let payload = command.payload();
        timeout(self.command_timeout, self.transport.put(&address, resource, &payload))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(address)
    }

    pub fn observe_furnace(&self, on: bool) {
        self.state.lock().observed.furnace_on = Some(on);
    }

    pub fn observe_auto_control(&self, enabled: bool) {
        self.state.lock().observed.automatic_control_enabled = Some(enabled);
    }

    pub fn observed(&self) -> ObservedRemoteState {
        self.state.lock().observed
    }

    /// État du four pour le log périodique (inconnu = éteint)
    pub fn furnace_on(&self) -> bool {
        self.observed().furnace_on.unwrap_or(false)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.state.lock().starvation.thresholds
    }

    /// Remplace les seuils présents dans le patch, sans validation de plage
    pub fn update_thresholds(&self, patch: ThresholdsPatch) -> Thresholds {
        let mut state = self.state.lock();
        state.starvation.thresholds.merge(patch);
        let t = state.starvation.thresholds;
        info!(
            "[furnace] thresholds updated: max_on={} min_on={} load_hour={}",
            t.max_on, t.min_on, t.load_hour
        );
        t
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.state.lock();
        let s = &state.starvation;
        ControllerSnapshot {
            observed: state.observed,
            history: s.history().iter().map(|on| u8::from(*on)).collect(),
            total_on: s.total_on(),
            pending_override_hours: s.pending_override_hours,
            max_reached: s.max_reached,
            thresholds: s.thresholds,
        }
    }
}

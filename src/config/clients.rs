use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Highest day of month a billing cycle may start on.
pub const MAX_CYCLE_DAY: u32 = 31;

/// A client account: which LangSmith project it bills against and when its
/// billing cycle starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// LangSmith project name.
    pub project: String,

    /// Display name shown on the dashboard.
    pub name: String,

    /// Day of month (1-31) on which the billing cycle starts.
    pub cycle_day: u32,
}

/// Static table of client accounts keyed by client id.
///
/// Built once from configuration and handed to the components that need it;
/// never mutated after startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientRegistry {
    clients: BTreeMap<String, ClientConfig>,
}

impl ClientRegistry {
    pub fn new(clients: BTreeMap<String, ClientConfig>) -> Self {
        Self { clients }
    }

    /// Look up a client by id.
    pub fn get(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.get(client_id)
    }

    /// Iterate clients in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClientConfig)> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Distinct project names across all clients, sorted.
    pub fn projects(&self) -> Vec<String> {
        self.clients
            .values()
            .map(|c| c.project.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        for (id, client) in &self.clients {
            if id.trim().is_empty() {
                return Err("client ids must not be empty".into());
            }
            if client.project.trim().is_empty() {
                return Err(format!("client '{id}': project must not be empty"));
            }
            if client.name.trim().is_empty() {
                return Err(format!("client '{id}': name must not be empty"));
            }
            if !(1..=MAX_CYCLE_DAY).contains(&client.cycle_day) {
                return Err(format!(
                    "client '{id}': cycle_day must be between 1 and {MAX_CYCLE_DAY}, got {}",
                    client.cycle_day
                ));
            }
        }
        Ok(())
    }
}

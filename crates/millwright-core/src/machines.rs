use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use crate::store::{RecordStore, Snapshot, read_snapshot};

pub const MACHINES_COLLECTION: &str = "machines";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Machine {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl Machine {
    pub fn label(&self) -> &str {
        [self.name.as_deref(), self.code.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MachineCatalog {
    machines: BTreeMap<String, Machine>,
}

impl MachineCatalog {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut machines = BTreeMap::new();
        for (key, record) in snapshot {
            let parsed = serde_json::from_value::<Machine>(serde_json::Value::Object(
                record.clone(),
            ));
            let mut machine = match parsed {
                Ok(machine) => machine,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable machine record");
                    continue;
                }
            };
            machine.id = key.clone();
            machines.insert(key.clone(), machine);
        }
        Self { machines }
    }

    #[tracing::instrument(skip(store))]
    pub fn load<S: RecordStore + ?Sized>(store: &S) -> anyhow::Result<Self> {
        let snapshot = read_snapshot(store, MACHINES_COLLECTION)?;
        Ok(Self::from_snapshot(&snapshot))
    }

    pub fn get(&self, id: &str) -> Option<&Machine> {
        self.machines.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Display text for a task's `machine` reference: the machine's label
    /// when the reference is a known key, the reference itself otherwise.
    pub fn label_for<'a>(&'a self, reference: &'a str) -> &'a str {
        self.get(reference).map(Machine::label).unwrap_or(reference)
    }
}

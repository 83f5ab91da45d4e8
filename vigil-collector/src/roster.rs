//! Roster Store: the set of terminals expected to report, grouped by store.
//!
//! The roster is replaced wholesale. Readers clone the inner `Arc`, so a
//! reader holds either the previous roster or the new one in full.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::CollectorError;
use crate::models::TerminalIdentity;
use crate::state::{new_rw_state, SharedRw};

/// `storeId -> [terminalId, ...]`, as found in the roster file and in
/// `POST /load_expected_terminals` bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(BTreeMap<String, BTreeSet<String>>);

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a roster from raw store/terminal names. Malformed pairs are kept
    /// here and skipped by `identities`.
    pub fn from_entries<I, S, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<T>)>,
        S: Into<String>,
        T: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(store, terminals)| (store.into(), terminals.into_iter().map(Into::into).collect()))
            .collect();
        Self(map)
    }

    pub fn contains(&self, id: &TerminalIdentity) -> bool {
        self.0
            .get(id.store_id())
            .is_some_and(|terminals| terminals.contains(id.terminal_id()))
    }

    /// Well-formed identities only; a malformed pair is logged and skipped.
    pub fn identities(&self) -> Vec<TerminalIdentity> {
        let mut out = Vec::new();
        for (store, terminals) in &self.0 {
            for terminal in terminals {
                match TerminalIdentity::new(store, terminal) {
                    Ok(id) => out.push(id),
                    Err(e) => warn!("[roster] skipping entry: {}", e),
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a roster document. JSON is a subset of YAML, so both formats
    /// go through the YAML parser.
    pub fn parse(text: &str) -> Result<Self, CollectorError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CollectorError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("[roster] {} not found, starting with an empty roster", path.display());
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path).await?;
        let roster = Self::parse(&text)?;
        info!("[roster] loaded {} expected terminal(s) from {}", roster.len(), path.display());
        Ok(roster)
    }
}

#[derive(Clone, Default)]
pub struct RosterStore {
    current: SharedRw<Arc<Roster>>,
}

impl RosterStore {
    pub fn new(roster: Roster) -> Self {
        Self { current: new_rw_state(Arc::new(roster)) }
    }

    pub fn current(&self) -> Arc<Roster> {
        self.current.read().clone()
    }

    /// Atomic wholesale replace.
    pub fn replace(&self, roster: Roster) {
        let size = roster.len();
        *self.current.write() = Arc::new(roster);
        info!("[roster] replaced, {} expected terminal(s)", size);
    }
}

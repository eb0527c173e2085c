//! Immutable snapshot of the known identities.
//!
//! A snapshot is loaded from the gateway each time a session begins and is
//! shared read-only by the pipeline and the session. Identities registered
//! afterwards show up in the next snapshot, never in the current one.

use crate::error::SessionError;
use crate::gateway::Gateway;
use rollcall_core::{Embedding, Identity};
use rollcall_store::StoredIdentity;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    identities: Arc<[Identity]>,
}

impl Registry {
    pub fn load(gateway: &dyn Gateway) -> Result<Self, SessionError> {
        let rows = gateway
            .load_identities()
            .map_err(SessionError::RegistryUnavailable)?;
        let registry = Self::from_stored(rows);
        tracing::info!(
            identities = registry.len(),
            dim = registry.dim().unwrap_or(0),
            "identity registry loaded"
        );
        Ok(registry)
    }

    pub fn from_stored(rows: Vec<StoredIdentity>) -> Self {
        Self::from_identities(
            rows.into_iter()
                .map(|row| Identity {
                    name: row.name,
                    embedding: Embedding::new(row.encoding),
                    age: row.age,
                    contact: row.email,
                })
                .collect(),
        )
    }

    /// Sorts by name and drops duplicates, empty embeddings and identities
    /// whose dimension differs from the one most identities share. A tie in
    /// that count goes to the larger dimension.
    pub fn from_identities(mut identities: Vec<Identity>) -> Self {
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        identities.dedup_by(|a, b| a.name == b.name);

        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for identity in identities.iter().filter(|i| i.embedding.dim() > 0) {
            *counts.entry(identity.embedding.dim()).or_default() += 1;
        }
        let dim = counts
            .into_iter()
            .max_by_key(|&(dim, count)| (count, dim))
            .map(|(dim, _)| dim);
        identities.retain(|identity| {
            let keep = Some(identity.embedding.dim()) == dim && identity.embedding.dim() > 0;
            if !keep {
                tracing::warn!(
                    name = %identity.name,
                    dim = identity.embedding.dim(),
                    expected = dim.unwrap_or(0),
                    "skipping identity with mismatched embedding dimension"
                );
            }
            keep
        });

        Self {
            identities: identities.into(),
        }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities
            .binary_search_by(|i| i.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.identities[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Embedding dimension shared by every identity.
    pub fn dim(&self) -> Option<usize> {
        self.identities.first().map(|i| i.embedding.dim())
    }
}

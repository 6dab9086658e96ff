//! Payload file encoding and load-time reconciliation.
//!
//! The payload file is JSON holding the ordinal → id map and the id →
//! [`Document`] map. It is paired with the binary index file but the two
//! are written independently, so a crash or a stale copy can leave them
//! disagreeing. [`reconcile`] turns whatever was found on disk into a
//! consistent in-memory mapping and records everything it had to drop.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RagError;
use crate::models::Document;

const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
pub(crate) struct PayloadFile {
    pub version: u32,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Absent in payloads written before ordinals were recorded; those
    /// used the ordinal's decimal string as the id.
    #[serde(default)]
    pub index_to_docstore_id: Option<BTreeMap<usize, String>>,
    pub documents: HashMap<String, Document>,
}

#[derive(Serialize)]
struct PayloadView<'a> {
    version: u32,
    dims: usize,
    index_to_docstore_id: &'a BTreeMap<usize, String>,
    documents: &'a HashMap<String, Document>,
}

/// Serialize the live mapping without cloning the document store.
pub(crate) fn encode_payload(
    dims: usize,
    index_to_docstore_id: &BTreeMap<usize, String>,
    documents: &HashMap<String, Document>,
) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&PayloadView {
        version: PAYLOAD_VERSION,
        dims,
        index_to_docstore_id,
        documents,
    })
}

/// What a load had to repair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_vectors: usize,
    pub live_documents: usize,
    /// Ordinals present in the index with no usable document.
    pub dropped_ordinals: Vec<usize>,
    /// Documents in the payload that no live ordinal refers to.
    pub orphaned_documents: usize,
    /// Set when the payload file was missing or could not be parsed.
    pub payload_problem: Option<String>,
}

impl LoadReport {
    pub fn is_degraded(&self) -> bool {
        !self.dropped_ordinals.is_empty()
            || self.orphaned_documents > 0
            || self.payload_problem.is_some()
    }

    /// The degraded load as a [`RagError::CorruptedStore`], for reporting.
    pub fn as_error(&self) -> Option<RagError> {
        if !self.is_degraded() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(problem) = &self.payload_problem {
            parts.push(problem.clone());
        }
        if !self.dropped_ordinals.is_empty() {
            parts.push(format!(
                "{} of {} indexed vectors have no document",
                self.dropped_ordinals.len(),
                self.total_vectors
            ));
        }
        if self.orphaned_documents > 0 {
            parts.push(format!(
                "{} documents are not referenced by the index",
                self.orphaned_documents
            ));
        }
        Some(RagError::CorruptedStore(parts.join("; ")))
    }
}

pub(crate) struct Reconciled {
    pub index_to_id: BTreeMap<usize, String>,
    pub documents: HashMap<String, Document>,
    pub report: LoadReport,
}

/// Build a consistent ordinal → id → document mapping for an index holding
/// `total_vectors` vectors.
///
/// An ordinal survives only if it is in range, maps to an id not already
/// claimed by an earlier ordinal, and that id has a document. Every
/// dropped ordinal is logged.
pub(crate) fn reconcile(
    total_vectors: usize,
    payload: Option<PayloadFile>,
    payload_problem: Option<String>,
) -> Reconciled {
    let (mapping, mut documents) = match payload {
        Some(p) => (p.index_to_docstore_id, p.documents),
        None => (None, HashMap::new()),
    };
    let mapping = mapping.unwrap_or_else(|| {
        (0..total_vectors)
            .map(|ordinal| (ordinal, ordinal.to_string()))
            .collect()
    });

    let mut index_to_id = BTreeMap::new();
    let mut claimed = HashSet::new();
    let mut dropped = Vec::new();

    for ordinal in 0..total_vectors {
        match mapping.get(&ordinal) {
            Some(id) if documents.contains_key(id) && claimed.insert(id.clone()) => {
                index_to_id.insert(ordinal, id.clone());
            }
            Some(id) => {
                warn!(ordinal, id = %id, "dropping indexed vector: document missing or duplicated");
                dropped.push(ordinal);
            }
            None => {
                warn!(ordinal, "dropping indexed vector: no id recorded");
                dropped.push(ordinal);
            }
        }
    }

    for (ordinal, id) in mapping.range(total_vectors..) {
        warn!(ordinal, id = %id, "ignoring id mapped past the end of the index");
    }

    let before = documents.len();
    documents.retain(|id, _| claimed.contains(id));
    let orphaned = before - documents.len();
    if orphaned > 0 {
        warn!(orphaned, "discarding documents not referenced by the index");
    }

    let report = LoadReport {
        total_vectors,
        live_documents: documents.len(),
        dropped_ordinals: dropped,
        orphaned_documents: orphaned,
        payload_problem,
    };

    Reconciled {
        index_to_id,
        documents,
        report,
    }
}

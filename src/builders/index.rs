//! Index aggregation and `Save` (§4.2/Index).
//!
//! Grounded on the teacher's `image/cache_manager.rs` (collect-then-persist
//! shape, shared with `ManifestDraft::save`).

use super::manifest::ManifestDraft;
use crate::concurrency::Budget;
use crate::digest::Digest;
use crate::error::Result;
use crate::oci::{self, Descriptor, ImageIndex, ImageIndexBuilder};
use crate::reference::Reference;
use crate::store::handler::Handler;
use std::collections::HashMap;

pub struct IndexDraft {
    /// Descriptors of manifests already persisted (carried over from a
    /// pre-existing index, or survivors of a merge).
    existing: Vec<Descriptor>,
    /// Manifests not yet persisted; `save` persists each in turn.
    pending: Vec<ManifestDraft>,
    annotations: HashMap<String, String>,
}

impl IndexDraft {
    pub fn new() -> Self {
        Self {
            existing: Vec::new(),
            pending: Vec::new(),
            annotations: HashMap::new(),
        }
    }

    pub fn carry_over(&mut self, descriptor: Descriptor) -> &mut Self {
        self.existing.push(descriptor);
        self
    }

    pub fn add_manifest(&mut self, draft: ManifestDraft) -> &mut Self {
        self.pending.push(draft);
        self
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// 1. `Save` each pending draft manifest, collecting descriptors.
    /// 2. Marshal, digest, persist, and atomically repoint the tag.
    pub async fn save(self, handler: &dyn Handler, reference: &Reference, budget: &Budget) -> Result<(Digest, ImageIndex)> {
        let mut manifests = self.existing;
        for draft in self.pending {
            let saved = draft.save(handler, reference, budget).await?;
            manifests.push(saved.descriptor());
        }

        let mut builder = ImageIndexBuilder::default()
            .schema_version(oci::SCHEMA_VERSION)
            .manifests(manifests);
        if !self.annotations.is_empty() {
            builder = builder.annotations(self.annotations);
        }
        let index = builder
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;

        let digest = Digest::of_json(&index)?;
        let bytes = serde_json::to_vec(&serde_json::to_value(&index)?)?;
        handler
            .save_descriptor(reference, &oci::media_type_index(), &digest, &bytes, None)
            .await?;
        Ok((digest, index))
    }
}

impl Default for IndexDraft {
    fn default() -> Self {
        Self::new()
    }
}

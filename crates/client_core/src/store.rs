//! Per-turn phase results.
//!
//! The store only holds data. Turn lifecycle and busy tracking live on
//! [`crate::turn::Turn`], which is why `available_phases` takes the busy
//! predicate from its caller.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::{
    phase::Phase,
    protocol::{VectorResult, WebResult},
};

/// Preview text comes from the first of these phases with non-empty content.
const PREVIEW_PRIORITY: [Phase; 4] = [
    Phase::Yield,
    Phase::ExperienceVectors,
    Phase::ExperienceWeb,
    Phase::Action,
];

static EMPTY_RESULT: PhaseResult = PhaseResult {
    content: String::new(),
    provider: None,
    model_name: None,
    vector_results: Vec::new(),
    web_results: Vec::new(),
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseResult {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vector_results: Vec<VectorResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub web_results: Vec<WebResult>,
}

/// SHA-256 over everything that feeds pagination: the text and both
/// attachment lists. Attribution fields are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(pub [u8; 32]);

impl PhaseResult {
    pub fn has_attachments(&self) -> bool {
        !self.vector_results.is_empty() || !self.web_results.is_empty()
    }

    pub fn attachment_count(&self) -> usize {
        self.vector_results.len() + self.web_results.len()
    }

    /// True when there is nothing to render.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && !self.has_attachments()
    }

    pub fn digest(&self) -> ContentDigest {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, self.content.as_bytes());

        hasher.update((self.vector_results.len() as u64).to_le_bytes());
        for hit in &self.vector_results {
            hash_field(&mut hasher, hit.content.as_bytes());
            hasher.update(hit.score.to_bits().to_le_bytes());
            hash_optional(&mut hasher, hit.provider.as_deref());
            hash_optional(&mut hasher, hit.id.as_deref());
        }

        hasher.update((self.web_results.len() as u64).to_le_bytes());
        for hit in &self.web_results {
            hash_field(&mut hasher, hit.title.as_bytes());
            hash_field(&mut hasher, hit.url.as_bytes());
            hash_field(&mut hasher, hit.content.as_bytes());
            hash_optional(&mut hasher, hit.provider.as_deref());
        }

        ContentDigest(hasher.finalize().into())
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            hash_field(hasher, value.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub changed: bool,
    pub preview_changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PhaseContentStore {
    results: BTreeMap<Phase, PhaseResult>,
    preview: Option<String>,
}

impl PhaseContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the phase text. Attribution is only overwritten when the
    /// update carries it, so partial running updates keep the provider.
    pub fn upsert(
        &mut self,
        phase: Phase,
        content: impl Into<String>,
        provider: Option<String>,
        model_name: Option<String>,
    ) -> UpsertOutcome {
        let content = content.into();
        let entry = self.results.entry(phase).or_default();
        let mut changed = false;

        if entry.content != content {
            entry.content = content;
            changed = true;
        }
        if provider.is_some() && entry.provider != provider {
            entry.provider = provider;
            changed = true;
        }
        if model_name.is_some() && entry.model_name != model_name {
            entry.model_name = model_name;
            changed = true;
        }

        let preview_changed = changed && self.refresh_preview();
        UpsertOutcome {
            changed,
            preview_changed,
        }
    }

    pub fn attach_vector_results(&mut self, phase: Phase, results: Vec<VectorResult>) -> bool {
        let entry = self.results.entry(phase).or_default();
        if entry.vector_results == results {
            return false;
        }
        entry.vector_results = results;
        true
    }

    pub fn attach_web_results(&mut self, phase: Phase, results: Vec<WebResult>) -> bool {
        let entry = self.results.entry(phase).or_default();
        if entry.web_results == results {
            return false;
        }
        entry.web_results = results;
        true
    }

    pub fn get(&self, phase: Phase) -> &PhaseResult {
        self.results.get(&phase).unwrap_or(&EMPTY_RESULT)
    }

    pub fn has_content(&self, phase: Phase) -> bool {
        !self.get(phase).is_empty()
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    /// Phases with something to show, or still being produced, in registry
    /// order.
    pub fn available_phases(&self, is_busy: impl Fn(Phase) -> bool) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|phase| self.has_content(*phase) || is_busy(*phase))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, &PhaseResult)> {
        self.results.iter().map(|(phase, result)| (*phase, result))
    }

    fn refresh_preview(&mut self) -> bool {
        let next = PREVIEW_PRIORITY
            .iter()
            .map(|phase| self.get(*phase).content.as_str())
            .find(|content| !content.is_empty())
            .map(str::to_string);
        if next == self.preview {
            return false;
        }
        self.preview = next;
        true
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;

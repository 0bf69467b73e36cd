//! Payload files the daemon serves on its own: template responses and the
//! distribution pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use trade_common::config::{DistributionSection, TemplateRule};
use trade_common::{Payload, SLOT_SIZE};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a payload file")]
    NotAPayload(PathBuf),
}

/// Read one encoded payload.
pub fn load_payload(path: &Path) -> Result<Payload, LibraryError> {
    let bytes = std::fs::read(path).map_err(|source| LibraryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.len() < SLOT_SIZE {
        return Err(LibraryError::NotAPayload(path.to_path_buf()));
    }
    let payload = Payload::decode(&bytes);
    if payload.is_empty() {
        return Err(LibraryError::NotAPayload(path.to_path_buf()));
    }
    Ok(payload)
}

/// Read every `.bin` payload in `dir`, sorted by file name.
pub fn load_folder(dir: &Path) -> Result<Vec<Payload>, LibraryError> {
    let read_err = |source| LibraryError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(read_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    paths.sort();
    paths.iter().map(|path| load_payload(path)).collect()
}

// ── Templates ───────────────────────────────────────────────────────────

struct Template {
    nickname: Option<String>,
    species: Option<u16>,
    response: Payload,
}

impl Template {
    fn matches(&self, offer: &Payload) -> bool {
        let nickname_ok = self
            .nickname
            .as_deref()
            .is_none_or(|n| offer.nickname.eq_ignore_ascii_case(n));
        let species_ok = self.species.is_none_or(|s| s == offer.species);
        nickname_ok && species_ok
    }
}

/// Result of a tracked template request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateLookup {
    Matched(Payload),
    /// The partner asked for the same template twice in a row.
    Abuse,
    NoMatch,
}

/// Offer-to-response rules, first match wins.
#[derive(Default)]
pub struct TemplateTable {
    templates: Vec<Template>,
    species_filter: Option<u16>,
    /// Last template index handed to each online id.
    last_served: Mutex<HashMap<u64, usize>>,
}

impl TemplateTable {
    /// Load every rule and its response file.
    pub fn load(section: &DistributionSection) -> Result<Self, LibraryError> {
        let mut entries = Vec::with_capacity(section.templates.len());
        for rule in &section.templates {
            let response = load_payload(&rule.send)?;
            entries.push((rule.clone(), response));
        }
        info!("Loaded {} trade templates", entries.len());
        Ok(Self::from_entries(entries, section.template_species))
    }

    pub fn from_entries(entries: Vec<(TemplateRule, Payload)>, species_filter: Option<u16>) -> Self {
        Self {
            templates: entries
                .into_iter()
                .map(|(rule, response)| Template {
                    nickname: rule.nickname,
                    species: rule.species,
                    response,
                })
                .collect(),
            species_filter,
            last_served: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn position(&self, offer: &Payload) -> Option<usize> {
        self.templates.iter().position(|t| t.matches(offer))
    }

    /// Untracked lookup.
    pub fn find(&self, offer: &Payload) -> Option<&Payload> {
        self.position(offer).map(|i| &self.templates[i].response)
    }

    /// Lookup on behalf of partner `nid`, applying the species filter and
    /// repeat tracking. An `nid` of zero is never tracked.
    pub fn request(&self, offer: &Payload, nid: u64) -> TemplateLookup {
        if self.species_filter.is_some_and(|s| s != offer.species) {
            return TemplateLookup::NoMatch;
        }
        let Some(index) = self.position(offer) else {
            return TemplateLookup::NoMatch;
        };
        if nid != 0 {
            let mut last = self.last_served.lock().unwrap_or_else(|e| e.into_inner());
            if last.insert(nid, index) == Some(index) {
                debug!(nid, index, "Repeated template request");
                return TemplateLookup::Abuse;
            }
        }
        TemplateLookup::Matched(self.templates[index].response.clone())
    }
}

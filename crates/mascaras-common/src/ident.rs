//! Temporary resource identifier generation
//!
//! Every resource a run creates is named after the temporary cluster:
//! `<cluster>-instance`, `<cluster>-snapshot` and `<snapshot>-export-task`.

use crate::defaults::RANDOM_SUFFIX_LEN;
use rand::rngs::OsRng;
use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random lowercase alphanumeric string from the OS entropy source.
///
/// RDS identifiers must be lowercase, so the alphabet excludes capitals.
pub fn random_suffix(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Build `<prefix>-<random suffix>`
pub fn generate_cluster_identifier(prefix: &str) -> String {
    format!("{}-{}", prefix, random_suffix(RANDOM_SUFFIX_LEN))
}

/// Identifiers of every resource derived from one temporary cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempIdentifiers {
    pub cluster: String,
    pub instance: String,
    pub snapshot: String,
}

impl TempIdentifiers {
    /// Use `explicit` when set, otherwise generate from `prefix`
    pub fn resolve(explicit: Option<&str>, prefix: &str) -> Self {
        let cluster = match explicit {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_cluster_identifier(prefix),
        };
        Self::for_cluster(cluster)
    }

    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        let cluster = cluster.into();
        Self {
            instance: format!("{cluster}-instance"),
            snapshot: format!("{cluster}-snapshot"),
            cluster,
        }
    }

    /// Export task identifier, `<snapshot>-export-task` unless overridden
    pub fn export_task(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("{}-export-task", self.snapshot),
        }
    }
}

use crate::errors::AppError;
use crate::models::DeveloperProfile;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Cached developer profile with an integrity checksum.
///
/// The checksum is SHA-256 over the profile's JSON. An entry whose checksum
/// no longer matches, or that does not decode, is treated as a cache miss and
/// the caller falls back to the store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheEnvelope {
    pub profile: DeveloperProfile,
    pub cached_at: DateTime<Utc>,
    /// SHA-256 of the serialized profile (hex encoded)
    pub checksum: String,
}

impl CacheEnvelope {
    pub fn seal(profile: DeveloperProfile, cached_at: DateTime<Utc>) -> Result<Self, AppError> {
        let checksum = Self::compute_checksum(&profile)?;
        Ok(Self {
            profile,
            cached_at,
            checksum,
        })
    }

    fn compute_checksum(profile: &DeveloperProfile) -> Result<String, AppError> {
        let data = serde_json::to_string(profile)?;
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Returns true if the checksum still matches the profile.
    pub fn is_valid(&self) -> bool {
        match Self::compute_checksum(&self.profile) {
            Ok(computed) => computed == self.checksum,
            Err(_) => false,
        }
    }

    pub fn serialize(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and validates a serialized entry.
    ///
    /// Returns `None` if the JSON is unreadable or the checksum does not match.
    pub fn deserialize_and_validate(serialized: &str) -> Option<Self> {
        let entry: CacheEnvelope = match serde_json::from_str(serialized) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry: {}", e);
                return None;
            }
        };

        if entry.is_valid() {
            Some(entry)
        } else {
            // Checksum mismatch - cache poisoned
            tracing::warn!(
                "Cache validation failed for {}: checksum mismatch. Expected: {}",
                entry.profile.username,
                entry.checksum
            );
            None
        }
    }
}

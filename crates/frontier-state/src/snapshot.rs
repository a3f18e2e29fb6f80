//! Persisted frontier state envelope
//!
//! The coordinator serializes its full `FrontierState` into the envelope's
//! `payload`; the envelope itself carries the self-describing metadata
//! (schema version, plan id, coordination version, digest) that restore
//! paths need before touching the payload.
//!
//! Restoration is backward compatible: unknown top-level fields in a stored
//! envelope are ignored with a warning instead of failing the load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{StateResult, StateStoreError};

/// Envelope schema version written by this crate.
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

/// Content digest over an envelope payload (SHA-256 hex string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest(String);

impl StateDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        StateDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for StateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Self-describing persisted record for one coordinator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    /// Envelope schema version (for forward migrations).
    pub schema_version: u32,
    /// Plan the state belongs to; a restore across plans is rejected.
    pub plan_id: String,
    /// Coordination version at save time (monotonic per instance).
    pub coordination_version: u64,
    /// Timestamp of the last mutation captured by this envelope.
    pub last_update: DateTime<Utc>,
    /// SHA-256 digest of the serialized payload.
    pub payload_digest: StateDigest,
    /// The serialized frontier state (boundaries, metrics, pending
    /// optimizations, DAG nodes + edges + states, team capacities).
    pub payload: serde_json::Value,
}

impl StateEnvelope {
    /// Wrap a serialized frontier state, stamping the payload digest.
    pub fn seal(
        plan_id: impl Into<String>,
        coordination_version: u64,
        last_update: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> StateResult<Self> {
        let bytes = serde_json::to_vec(&payload)?;
        Ok(Self {
            schema_version: ENVELOPE_SCHEMA_VERSION,
            plan_id: plan_id.into(),
            coordination_version,
            last_update,
            payload_digest: StateDigest::from_bytes(&bytes),
            payload,
        })
    }

    /// Verify the payload against the stamped digest.
    pub fn verify_digest(&self) -> StateResult<()> {
        let bytes = serde_json::to_vec(&self.payload)?;
        let actual = StateDigest::from_bytes(&bytes);
        if actual != self.payload_digest {
            return Err(StateStoreError::DigestMismatch {
                expected: self.payload_digest.as_str().to_string(),
                actual: actual.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Check that this envelope belongs to `plan_id`.
    pub fn check_plan(&self, plan_id: &str) -> StateResult<()> {
        if self.plan_id != plan_id {
            return Err(StateStoreError::PlanMismatch {
                expected: plan_id.to_string(),
                found: self.plan_id.clone(),
            });
        }
        Ok(())
    }
}

/// Field names this envelope version understands.
const KNOWN_FIELDS: &[&str] = &[
    "schema_version",
    "plan_id",
    "coordination_version",
    "last_update",
    "payload_digest",
    "payload",
];

/// Restore an envelope from raw JSON, tolerating unknown fields.
///
/// Fields added by newer writers are ignored with a `warn!` so that older
/// coordinators can still restore the parts they understand.
pub fn restore_envelope(value: serde_json::Value) -> StateResult<StateEnvelope> {
    if let serde_json::Value::Object(map) = &value {
        for key in map.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                warn!(field = %key, "ignoring unknown field in persisted state envelope");
            }
        }
    }
    let envelope: StateEnvelope = serde_json::from_value(value)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> StateEnvelope {
        StateEnvelope::seal(
            "plan-7",
            42,
            Utc::now(),
            serde_json::json!({"boundaries": [], "capacities": {}}),
        )
        .unwrap()
    }

    #[test]
    fn test_seal_stamps_a_verifiable_digest() {
        let env = sample_envelope();
        env.verify_digest().unwrap();
    }

    #[test]
    fn test_tampered_payload_fails_digest_check() {
        let mut env = sample_envelope();
        env.payload = serde_json::json!({"boundaries": ["forged"]});
        assert!(matches!(
            env.verify_digest(),
            Err(StateStoreError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_check_plan_rejects_foreign_plan() {
        let env = sample_envelope();
        assert!(env.check_plan("plan-7").is_ok());
        assert!(matches!(
            env.check_plan("plan-8"),
            Err(StateStoreError::PlanMismatch { .. })
        ));
    }

    #[test]
    fn test_restore_ignores_unknown_fields() {
        let env = sample_envelope();
        let mut value = serde_json::to_value(&env).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("added_in_v9".to_string(), serde_json::json!("future"));
        let restored = restore_envelope(value).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn test_restore_roundtrip_preserves_version() {
        let env = sample_envelope();
        let value = serde_json::to_value(&env).unwrap();
        let restored = restore_envelope(value).unwrap();
        assert_eq!(restored.coordination_version, 42);
        assert_eq!(restored.plan_id, "plan-7");
    }
}

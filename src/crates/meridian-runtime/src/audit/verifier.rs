//! Full chain verification
//!
//! Walks the chain from sequence 1 upward, recomputing every entry hash,
//! checking previous-hash linkage and sequence density, and verifying every
//! signature against the key registry. Integrity failures are reported,
//! never corrected.

use sqlx::SqlitePool;

use meridian_core::schemas::VerificationReport;
use meridian_core::time::TimeService;

use super::hash_chain::{compute_entry_hash, AuditHashChain, GENESIS_HASH};
use super::signature::SignatureManager;

/// Verifier over one audit chain database.
pub struct AuditVerifier;

impl AuditVerifier {
    /// Verify the complete chain. An empty chain verifies as intact.
    pub async fn verify_complete_chain(
        pool: &SqlitePool,
        time: &dyn TimeService,
    ) -> VerificationReport {
        let started = time.timestamp();
        let chain = AuditHashChain::new(pool.clone());

        let rows = match chain.all_entries().await {
            Ok(rows) => rows,
            Err(e) => {
                let duration_ms = ((time.timestamp() - started) * 1000.0) as u64;
                return VerificationReport {
                    verified: false,
                    total_entries: 0,
                    valid_entries: 0,
                    invalid_entries: 0,
                    chain_intact: false,
                    first_invalid_entry: None,
                    duration_ms,
                    errors: vec![format!("cannot read audit chain: {e}")],
                };
            }
        };

        if rows.is_empty() {
            let duration_ms = ((time.timestamp() - started) * 1000.0) as u64;
            return VerificationReport::empty(duration_ms);
        }

        let total = rows.len() as u64;
        let mut valid: u64 = 0;
        let mut errors = Vec::new();
        let mut chain_intact = true;
        let mut first_invalid: Option<i64> = None;

        let mut expected_sequence: i64 = 1;
        let mut expected_previous = GENESIS_HASH.to_string();

        for row in rows {
            let mut row_valid = true;

            if row.sequence_number != expected_sequence {
                chain_intact = false;
                row_valid = false;
                errors.push(format!(
                    "sequence gap: expected {expected_sequence}, found {}",
                    row.sequence_number
                ));
            }
            if row.previous_hash != expected_previous {
                chain_intact = false;
                row_valid = false;
                errors.push(format!(
                    "broken linkage at sequence {}: previous hash mismatch",
                    row.sequence_number
                ));
            }

            let recomputed = compute_entry_hash(
                &row.entry_id,
                &row.event_timestamp,
                &row.event_type,
                &row.entity_id,
                &row.event_payload,
                row.sequence_number,
                &row.previous_hash,
            );
            if recomputed != row.entry_hash {
                chain_intact = false;
                row_valid = false;
                errors.push(format!(
                    "entry hash mismatch at sequence {}",
                    row.sequence_number
                ));
            }

            match SignatureManager::verify_with_registry(
                pool,
                &row.signing_key_id,
                &row.entry_hash,
                &row.signature,
            )
            .await
            {
                Ok(true) => {}
                Ok(false) => {
                    row_valid = false;
                    errors.push(format!(
                        "signature invalid at sequence {} (key {})",
                        row.sequence_number, row.signing_key_id
                    ));
                }
                Err(e) => {
                    row_valid = false;
                    errors.push(format!(
                        "signature check failed at sequence {}: {e}",
                        row.sequence_number
                    ));
                }
            }

            if row_valid {
                valid += 1;
            } else if first_invalid.is_none() {
                first_invalid = Some(row.sequence_number);
            }

            // Follow the stored chain even past a bad entry so every
            // defect is reported, not just the first.
            expected_previous = row.entry_hash.clone();
            expected_sequence = row.sequence_number + 1;
        }

        let invalid = total - valid;
        let duration_ms = ((time.timestamp() - started) * 1000.0) as u64;
        VerificationReport {
            verified: invalid == 0 && chain_intact,
            total_entries: total,
            valid_entries: valid,
            invalid_entries: invalid,
            chain_intact,
            first_invalid_entry: first_invalid,
            duration_ms,
            errors,
        }
    }
}

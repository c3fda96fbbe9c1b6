use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use extrait_core::statement::TransactionRecord;

/// Deterministic content hash over the record's stable fields, hex
/// encoded. Records with identical content hash identically; uniqueness
/// is layered on top by [`assign_content_id`].
pub fn content_hash(record: &TransactionRecord) -> String {
    let mut hasher = Sha256::new();
    for part in [
        record.date.to_string(),
        record.amount.to_string(),
        record.payee.clone(),
        record.memo.clone(),
        record.check_no.clone().unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Fill the record's id with its content hash, made unique within the
/// account by a `-N` suffix. A suffixed record also gets a visible
/// ` #N+1` memo annotation so textually identical repeated transactions
/// stay distinguishable to a reader.
pub fn assign_content_id(record: &mut TransactionRecord, used: &mut HashSet<String>) {
    let base = content_hash(record);
    let mut id = base.clone();
    let mut counter = 0u32;
    while used.contains(&id) {
        counter += 1;
        id = format!("{base}-{counter}");
    }
    used.insert(id.clone());

    if counter > 0 {
        debug!(counter, "content-hash collision, suffixing id");
        if !record.memo.is_empty() {
            record.memo = format!("{} #{}", record.memo, counter + 1);
        }
    }
    record.id = Some(id);
}

//! Provisional-to-canonical identity remapping.

use crate::object::ObjectId;
use crate::selection::Selection;
use crate::store::ObjectStore;

/// Result of [`remap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remap {
    /// The object now lives under the canonical id.
    Rekeyed,
    /// The ledger's copy already occupies (or has deleted) the canonical id;
    /// the provisional copy was discarded.
    Superseded,
    /// Nothing stored under the provisional id (deleted locally before the
    /// confirmation arrived, or already remapped).
    Missing,
}

/// Re-key the object stored under `provisional` to `canonical`, migrating
/// selection membership and any in-flight transform snapshot.
pub fn remap(
    store: &mut ObjectStore,
    selection: &mut Selection,
    provisional: ObjectId,
    canonical: ObjectId,
) -> Remap {
    if !provisional.is_provisional() || !canonical.is_canonical() {
        log::warn!("Ignoring remap {} -> {}: wrong id namespace", provisional, canonical);
        return Remap::Missing;
    }
    let Some((mut object, seq)) = store.take(provisional) else {
        log::debug!("Remap {} -> {}: provisional object no longer exists", provisional, canonical);
        return Remap::Missing;
    };

    object.id = canonical;
    let outcome = if store.restore(object, seq) {
        Remap::Rekeyed
    } else {
        log::debug!("Remap {} -> {}: canonical id already known, dropping local copy", provisional, canonical);
        Remap::Superseded
    };
    selection.replace_id(store, provisional, canonical);
    outcome
}

//! Pre-delete cascade over registered one-to-many pointers.
//!
//! # Invariants
//! - Runs before the owner row is removed, so junction rows are still
//!   reachable through their foreign key.
//! - Every row reachable through a cascading pointer is deleted, no matter
//!   how many there are. Related entities on the other side are untouched.

use crate::error::MtomResult;
use crate::model::entity::EntityId;
use crate::store::EntityStore;
use log::{debug, info};

/// Deletes junction rows owned by `entity_type` row `id`.
///
/// Types without a schema entry own nothing and delete zero rows.
pub fn before_delete<S: EntityStore>(
    store: &S,
    entity_type: &str,
    id: EntityId,
) -> MtomResult<usize> {
    let Some(entity) = store.schema().find_entity(entity_type) else {
        return Ok(0);
    };

    let mut removed = 0;
    for relation in entity.cascading_relations() {
        let rows = store.query_rows(&relation.query_for(id))?;
        for row in &rows {
            if store.delete_row(relation.junction_table, row.id)? {
                removed += 1;
            }
        }
        debug!(
            "event=cascade_delete module=store status=step entity={entity_type} id={id} relation={} rows={}",
            relation.name,
            rows.len()
        );
    }

    info!("event=cascade_delete module=store status=ok entity={entity_type} id={id} removed={removed}");
    Ok(removed)
}

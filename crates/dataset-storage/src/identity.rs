//! Deterministic per-row identifiers.
//!
//! A record id is the UUIDv5 of the row's 0-based position, namespaced by the
//! owning dataset's id. The same dataset id and row order always produce the
//! same ids; ids from different datasets do not collide.

use uuid::Uuid;

use crate::frame::{Frame, RowIndex};

pub fn record_id(dataset_id: Uuid, position: usize) -> Uuid {
    Uuid::new_v5(&dataset_id, position.to_string().as_bytes())
}

/// Replace the frame's index with one record id per row.
///
/// Any existing index is discarded first, so positions are always dense and
/// start at zero.
pub fn assign_record_ids(dataset_id: Uuid, mut frame: Frame) -> Frame {
    let ids = (0..frame.len())
        .map(|position| record_id(dataset_id, position).to_string())
        .collect();
    frame.reset_index();
    frame.set_index(RowIndex::RecordIds(ids));
    frame
}

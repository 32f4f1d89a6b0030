use serde_json::Map;

use crate::error::{AppError, AppResult};
use crate::model::{normalize_room_id, Address, ListStatus, ListType, RdList, Room};
use crate::store::{encode, rooms_collection, Store};
use crate::time::now_ms;

/// A lifecycle call was made against a list in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("list {id} is {found}, expected {expected}")]
pub struct TransitionError {
    pub id: String,
    pub found: ListStatus,
    pub expected: ListStatus,
}

impl From<TransitionError> for AppError {
    fn from(error: TransitionError) -> Self {
        AppError::new("LIST/INVALID_STATE", error.to_string())
            .with_context("list_id", error.id)
            .with_context("status", error.found.to_string())
            .with_context("expected", error.expected.to_string())
    }
}

fn require_status(list: &RdList, expected: ListStatus) -> AppResult<()> {
    if list.status != expected {
        return Err(TransitionError {
            id: list.id.clone(),
            found: list.status,
            expected,
        }
        .into());
    }
    Ok(())
}

/// Create a fresh pull list in `planning`. No rooms yet.
pub async fn create_list(store: &Store, address: Address, client: &str) -> AppResult<RdList> {
    let list = RdList::new(address, client);
    store
        .set(list.collection(), &list.id, &encode(&list)?)
        .await?;
    tracing::info!(
        target = "rathdown",
        event = "list_created",
        list_id = %list.id,
        client = %list.client
    );
    Ok(list)
}

/// Add a room to a list, deduplicating on the normalized room id.
///
/// Returns `(list, false)` without writing anything when a room whose name
/// normalizes to the same id already exists; "Kitchen" and "kitchen " are
/// the same room.
pub async fn create_room(
    store: &Store,
    list: &RdList,
    room_name: &str,
) -> AppResult<(RdList, bool)> {
    let room_id = normalize_room_id(room_name);
    if room_id.is_empty() {
        return Err(AppError::new("ROOM/VALIDATION", "Room name is empty")
            .with_context("room_name", room_name.to_string()));
    }

    let collection = list.collection();
    let doc = store
        .get(collection, &list.id)
        .await?
        .ok_or_else(|| {
            AppError::new("LIST/NOT_FOUND", "List does not exist")
                .with_context("list_id", list.id.clone())
                .with_context("collection", collection.to_string())
        })?;
    let stored: RdList = doc.decode()?;

    if stored.room_ids.iter().any(|id| id == &room_id) {
        return Ok((stored, false));
    }

    let room = Room::new(room_name, &stored.id);
    store
        .set(
            &rooms_collection(collection, &stored.id),
            &room.id,
            &encode(&room)?,
        )
        .await?;

    let mut updated = stored;
    updated.room_ids.push(room_id);
    let mut fields = Map::new();
    fields.insert(
        "roomIds".into(),
        serde_json::to_value(&updated.room_ids).map_err(AppError::from)?,
    );
    store.merge_set(collection, &updated.id, fields).await?;

    Ok((updated, true))
}

/// `planning -> staging`, in place: same id, same collection, no room work.
pub async fn promote_to_staging(store: &Store, list: &RdList) -> AppResult<RdList> {
    require_status(list, ListStatus::Planning)?;
    set_status_in_place(store, list, ListStatus::Staging).await
}

/// `unstaged -> staging`, in place. An uninstalled list already lives in the
/// pull-list collection again, so restaging is a status flip, not a clone.
pub async fn restage(store: &Store, list: &RdList) -> AppResult<RdList> {
    require_status(list, ListStatus::Unstaged)?;
    set_status_in_place(store, list, ListStatus::Staging).await
}

async fn set_status_in_place(
    store: &Store,
    list: &RdList,
    status: ListStatus,
) -> AppResult<RdList> {
    let mut fields = Map::new();
    fields.insert(
        "status".into(),
        serde_json::to_value(status).map_err(AppError::from)?,
    );
    store.merge_set(list.collection(), &list.id, fields).await?;
    let mut updated = list.clone();
    updated.status = status;
    Ok(updated)
}

/// Duplicate a staging list into the installed collection.
///
/// Carries `id`, `address`, `created_date`, `room_ids` and `client`
/// verbatim; flips `status`/`list_type` and stamps `install_date`. The list
/// document and every readable room clone commit in one batch. Rooms that
/// cannot be read are skipped: the readable subset still commits and the
/// call returns `CLONE/INCOMPLETE` naming the missing rooms, so a caller
/// can re-run the clone (room writes are full overwrites).
pub async fn install_from_staging(store: &Store, list: &RdList) -> AppResult<RdList> {
    require_status(list, ListStatus::Staging)?;

    let mut installed = list.clone();
    installed.status = ListStatus::Installed;
    installed.list_type = ListType::InstalledList;
    installed.install_date = Some(now_ms());

    duplicate_with_rooms(store, list, installed).await
}

/// The mirror of `install_from_staging`: duplicate an installed list back
/// into the pull-list collection as `unstaged`, cloning its rooms the same
/// way.
pub async fn uninstall_to_unstaged(store: &Store, list: &RdList) -> AppResult<RdList> {
    require_status(list, ListStatus::Installed)?;

    let mut unstaged = list.clone();
    unstaged.status = ListStatus::Unstaged;
    unstaged.list_type = ListType::PullList;
    unstaged.uninstall_date = Some(now_ms());

    duplicate_with_rooms(store, list, unstaged).await
}

async fn duplicate_with_rooms(
    store: &Store,
    source: &RdList,
    target: RdList,
) -> AppResult<RdList> {
    let source_rooms = rooms_collection(source.collection(), &source.id);
    let target_rooms = rooms_collection(target.collection(), &target.id);

    let mut batch = store.batch();
    batch.set(target.collection(), &target.id, encode(&target)?);

    let mut missing: Vec<String> = Vec::new();
    for room_id in &source.room_ids {
        let doc = match store.get(&source_rooms, room_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                missing.push(room_id.clone());
                continue;
            }
            Err(err) => {
                tracing::warn!(
                    target = "rathdown",
                    event = "room_clone_read_failed",
                    list_id = %source.id,
                    room_id = %room_id,
                    error = %err
                );
                missing.push(room_id.clone());
                continue;
            }
        };
        if let Err(err) = doc.decode::<Room>() {
            tracing::warn!(
                target = "rathdown",
                event = "room_clone_undecodable",
                list_id = %source.id,
                room_id = %room_id,
                error = %err
            );
            missing.push(room_id.clone());
            continue;
        }
        // Clone the raw payload so the itemModelIdMap contents carry over
        // byte for byte.
        batch.set(&target_rooms, room_id, doc.data);
    }

    store.commit_batch(batch).await?;

    tracing::info!(
        target = "rathdown",
        event = "list_duplicated",
        list_id = %target.id,
        status = %target.status,
        rooms = target.room_ids.len() - missing.len(),
        missing = missing.len()
    );

    if !missing.is_empty() {
        return Err(AppError::new(
            "CLONE/INCOMPLETE",
            "Some rooms could not be read during list duplication",
        )
        .with_context("list_id", target.id)
        .with_context("missing_room_ids", missing.join(",")));
    }

    Ok(target)
}

/// Delete a list and, best effort, its rooms. A failed room delete is
/// logged and skipped; the list document delete still runs.
pub async fn delete_list(store: &Store, list: &RdList) -> AppResult<()> {
    let rooms = rooms_collection(list.collection(), &list.id);
    for room_id in &list.room_ids {
        if let Err(err) = store.delete(&rooms, room_id).await {
            tracing::warn!(
                target = "rathdown",
                event = "room_delete_failed",
                list_id = %list.id,
                room_id = %room_id,
                error = %err
            );
        }
    }
    store.delete(list.collection(), &list.id).await?;
    tracing::info!(target = "rathdown", event = "list_deleted", list_id = %list.id);
    Ok(())
}

use std::collections::{BTreeSet, HashMap};

use serde_json::Map;

use crate::error::{AppError, AppResult};
use crate::model::{Item, Model, RdList, Room, ITEMS, MODELS};
use crate::store::{rooms_collection, Field, Filter, Query, Store};

/// Add an item to a room's membership roster.
///
/// Insert-only idempotence: re-adding an item that is already a key of
/// `item_model_id_map` is a no-op returning `inserted = false`. On insert
/// the map is persisted as a partial field update of the room document, not
/// a full rewrite.
pub async fn add_item_to_room(
    store: &Store,
    list: &RdList,
    room: &Room,
    item: &Item,
) -> AppResult<(Room, bool)> {
    let collection = rooms_collection(list.collection(), &list.id);
    let doc = store.get(&collection, &room.id).await?.ok_or_else(|| {
        AppError::new("ROOM/NOT_FOUND", "Room does not exist")
            .with_context("list_id", list.id.clone())
            .with_context("room_id", room.id.clone())
    })?;
    let mut stored: Room = doc.decode()?;

    if stored.item_model_id_map.contains_key(&item.id) {
        return Ok((stored, false));
    }

    stored
        .item_model_id_map
        .insert(item.id.clone(), item.model_id.clone());

    let mut fields = Map::new();
    fields.insert(
        "itemModelIdMap".into(),
        serde_json::to_value(&stored.item_model_id_map).map_err(AppError::from)?,
    );
    store.merge_set(&collection, &stored.id, fields).await?;

    Ok((stored, true))
}

/// Toggle an item in the room's staged-for-action subset. Selecting an item
/// that is not in the roster is a validation error.
pub async fn set_item_selected(
    store: &Store,
    list: &RdList,
    room: &Room,
    item_id: &str,
    selected: bool,
) -> AppResult<Room> {
    let collection = rooms_collection(list.collection(), &list.id);
    let doc = store.get(&collection, &room.id).await?.ok_or_else(|| {
        AppError::new("ROOM/NOT_FOUND", "Room does not exist")
            .with_context("list_id", list.id.clone())
            .with_context("room_id", room.id.clone())
    })?;
    let mut stored: Room = doc.decode()?;

    if selected && !stored.item_model_id_map.contains_key(item_id) {
        return Err(
            AppError::new("ROOM/VALIDATION", "Item is not part of this room")
                .with_context("room_id", stored.id)
                .with_context("item_id", item_id.to_string()),
        );
    }
    let changed = if selected {
        stored.selected_item_id_set.insert(item_id.to_string())
    } else {
        stored.selected_item_id_set.remove(item_id)
    };
    if !changed {
        return Ok(stored);
    }

    let mut fields = Map::new();
    fields.insert(
        "selectedItemIdSet".into(),
        serde_json::to_value(&stored.selected_item_id_set).map_err(AppError::from)?,
    );
    store.merge_set(&collection, &stored.id, fields).await?;
    Ok(stored)
}

/// Resolve a room's roster into Item records and the Models they reference.
///
/// Two batched id-in-set queries (items, then the distinct model ids from
/// the roster) instead of one request per item. Records that fail to decode
/// are dropped with a warning, matching the query engine's best-effort
/// policy; `get_model_for_item` returns `None` for their items.
pub async fn load_items_and_models(
    store: &Store,
    room: &Room,
) -> AppResult<(Vec<Item>, HashMap<String, Model>)> {
    if room.item_model_id_map.is_empty() {
        return Ok((Vec::new(), HashMap::new()));
    }

    let item_ids: Vec<String> = room.item_model_id_map.keys().cloned().collect();
    let mut query = Query::new(ITEMS, Field::Id);
    query.filters.push(Filter::IdIn(item_ids));
    let docs = store.query(&query).await?;
    let mut items = Vec::with_capacity(docs.len());
    for doc in &docs {
        match doc.decode::<Item>() {
            Ok(item) => items.push(item),
            Err(err) => {
                tracing::warn!(
                    target = "rathdown",
                    event = "item_dropped",
                    room_id = %room.id,
                    id = %doc.id,
                    error = %err
                );
            }
        }
    }

    let model_ids: BTreeSet<String> = room.item_model_id_map.values().cloned().collect();
    let mut query = Query::new(MODELS, Field::Id);
    query
        .filters
        .push(Filter::IdIn(model_ids.into_iter().collect()));
    let docs = store.query(&query).await?;
    let mut models_by_id = HashMap::with_capacity(docs.len());
    for doc in &docs {
        match doc.decode::<Model>() {
            Ok(model) => {
                models_by_id.insert(model.id.clone(), model);
            }
            Err(err) => {
                tracing::warn!(
                    target = "rathdown",
                    event = "model_dropped",
                    room_id = %room.id,
                    id = %doc.id,
                    error = %err
                );
            }
        }
    }

    Ok((items, models_by_id))
}

/// Pure lookup. Absent when the model never existed or was dropped during
/// decode.
pub fn get_model_for_item<'a>(
    item: &Item,
    models_by_id: &'a HashMap<String, Model>,
) -> Option<&'a Model> {
    models_by_id.get(&item.model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup_is_by_item_model_id() {
        let model = Model::new("Chair", "seating", "black", "wood");
        let item = Item::new(&model.id, "warehouse");
        let mut models_by_id = HashMap::new();
        models_by_id.insert(model.id.clone(), model.clone());

        assert_eq!(get_model_for_item(&item, &models_by_id), Some(&model));

        let orphan = Item::new("missing-model", "warehouse");
        assert_eq!(get_model_for_item(&orphan, &models_by_id), None);
    }
}

use serde_json::Map;

use crate::error::{AppError, AppResult};
use crate::model::{Item, Model, Warehouse, ITEMS, MODELS};
use crate::store::{encode, Store};

fn model_not_found(model_id: &str) -> AppError {
    AppError::new("MODEL/NOT_FOUND", "Model does not exist")
        .with_context("model_id", model_id.to_string())
}

/// Create a physical item for a model.
///
/// The item document and the model's roster/count update commit in one
/// batch, so the roster can never disagree with the items collection on the
/// happy path. The owning model is re-read first; creating an item for an
/// unknown model is a validation failure.
pub async fn create_item(
    store: &Store,
    model: &Model,
    location_id: &str,
) -> AppResult<(Model, Item)> {
    let doc = store
        .get(MODELS, &model.id)
        .await?
        .ok_or_else(|| model_not_found(&model.id))?;
    let mut stored: Model = doc.decode()?;

    let item = Item::new(&stored.id, location_id);
    stored.item_ids.push(item.id.clone());
    stored.available_item_count += 1;

    let mut batch = store.batch();
    batch.set(ITEMS, &item.id, encode(&item)?);
    batch.set(MODELS, &stored.id, encode(&stored)?);
    store.commit_batch(batch).await?;

    tracing::info!(
        target = "rathdown",
        event = "item_created",
        item_id = %item.id,
        model_id = %stored.id,
        location = %location_id
    );
    Ok((stored, item))
}

/// Delete an item and remove it from its model's roster.
///
/// The item delete and the roster update commit together; the available
/// count is floored at zero. When the owning model is gone the item is
/// still deleted and `MODEL/NOT_FOUND` is returned, leaving nothing
/// dangling.
pub async fn delete_item(store: &Store, item: &Item) -> AppResult<Model> {
    let model_doc = store.get(MODELS, &item.model_id).await?;
    let Some(doc) = model_doc else {
        store.delete(ITEMS, &item.id).await?;
        return Err(model_not_found(&item.model_id).with_context("item_id", item.id.clone()));
    };
    let mut stored: Model = doc.decode()?;

    stored.item_ids.retain(|id| id != &item.id);
    stored.available_item_count = (stored.available_item_count - 1).max(0);

    let mut batch = store.batch();
    batch.delete(ITEMS, &item.id);
    batch.set(MODELS, &stored.id, encode(&stored)?);
    store.commit_batch(batch).await?;

    tracing::info!(
        target = "rathdown",
        event = "item_deleted",
        item_id = %item.id,
        model_id = %stored.id
    );
    Ok(stored)
}

/// Move an item to a new custodial location (a warehouse address id or a
/// list id). Partial field update; the rest of the item is untouched.
pub async fn move_item(store: &Store, item: &Item, location_id: &str) -> AppResult<Item> {
    require_item(store, &item.id).await?;
    let mut fields = Map::new();
    fields.insert("listId".into(), location_id.into());
    store.merge_set(ITEMS, &item.id, fields).await?;

    let mut updated = item.clone();
    updated.list_id = location_id.to_string();
    Ok(updated)
}

/// Return an item to warehouse custody after a job and mark it available
/// again. The warehouse id doubles as the custodial location id, so this is
/// a move plus an availability flip.
pub async fn return_to_warehouse(
    store: &Store,
    item: &Item,
    warehouse: &Warehouse,
) -> AppResult<Item> {
    let moved = move_item(store, item, &warehouse.id).await?;
    set_availability(store, &moved, true).await
}

/// Flip an item's availability and keep the model's available count in
/// step, clamped to `[0, roster size]`. Both writes commit together.
pub async fn set_availability(store: &Store, item: &Item, available: bool) -> AppResult<Item> {
    let stored: Item = require_item(store, &item.id).await?;
    if stored.is_available == available {
        return Ok(stored);
    }

    let mut updated = stored;
    updated.is_available = available;

    let mut batch = store.batch();
    batch.set(ITEMS, &updated.id, encode(&updated)?);

    if let Some(doc) = store.get(MODELS, &updated.model_id).await? {
        let mut model: Model = doc.decode()?;
        let delta = if available { 1 } else { -1 };
        model.available_item_count = (model.available_item_count + delta)
            .clamp(0, model.item_ids.len() as i64);
        batch.set(MODELS, &model.id, encode(&model)?);
    }
    store.commit_batch(batch).await?;
    Ok(updated)
}

/// Raise the maintenance flag on an item.
pub async fn flag_attention(store: &Store, item: &Item, reason: &str) -> AppResult<Item> {
    let stored: Item = require_item(store, &item.id).await?;
    let mut fields = Map::new();
    fields.insert("attention".into(), true.into());
    fields.insert("attentionReason".into(), reason.into());
    store.merge_set(ITEMS, &stored.id, fields).await?;

    let mut updated = stored;
    updated.attention = true;
    updated.attention_reason = Some(reason.to_string());
    Ok(updated)
}

pub async fn clear_attention(store: &Store, item: &Item) -> AppResult<Item> {
    let stored: Item = require_item(store, &item.id).await?;
    let mut fields = Map::new();
    fields.insert("attention".into(), false.into());
    fields.insert("attentionReason".into(), serde_json::Value::Null);
    store.merge_set(ITEMS, &stored.id, fields).await?;

    let mut updated = stored;
    updated.attention = false;
    updated.attention_reason = None;
    Ok(updated)
}

async fn require_item(store: &Store, item_id: &str) -> AppResult<Item> {
    let doc = store.get(ITEMS, item_id).await?.ok_or_else(|| {
        AppError::new("ITEM/NOT_FOUND", "Item does not exist")
            .with_context("item_id", item_id.to_string())
    })?;
    doc.decode()
}

/// Advisory roster check used by tests: the available count never exceeds
/// the roster, and roster ids are unique.
pub fn roster_consistent(model: &Model) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    let unique = model.item_ids.iter().all(|id| seen.insert(id));
    unique && model.available_item_count >= 0
        && model.available_item_count <= model.item_ids.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_consistency_flags_duplicates_and_overcounts() {
        let mut model = Model::new("Chair", "seating", "black", "wood");
        assert!(roster_consistent(&model));

        model.item_ids = vec!["a".into(), "b".into()];
        model.available_item_count = 2;
        assert!(roster_consistent(&model));

        model.available_item_count = 3;
        assert!(!roster_consistent(&model));

        model.available_item_count = 1;
        model.item_ids = vec!["a".into(), "a".into()];
        assert!(!roster_consistent(&model));
    }
}

use anyhow::Result;
use serde_json::json;

use rathdown::{
    encode, lifecycle, registry, rooms, rooms_collection, Address, Item, Model, RdList, Room,
    Store, ITEMS, MODELS, PULL_LISTS,
};

#[path = "util.rs"]
mod util;

async fn list_with_room(store: &Store) -> Result<(RdList, Room)> {
    let address = Address::new("1 Pier Rd", "Arklow", "WW", "Y14", "IE");
    let list = lifecycle::create_list(store, address, "acme").await?;
    let (list, _) = lifecycle::create_room(store, &list, "Den").await?;
    let room = store
        .get(&rooms_collection(PULL_LISTS, &list.id), "den")
        .await?
        .expect("room present")
        .decode::<Room>()?;
    Ok((list, room))
}

async fn seeded_model(store: &Store) -> Result<Model> {
    let model = Model::new("Chair", "seating", "black", "wood");
    store.set(MODELS, &model.id, &encode(&model)?).await?;
    Ok(model)
}

#[tokio::test]
async fn adding_an_item_twice_inserts_once() -> Result<()> {
    let store = util::memory_store().await;
    let (list, room) = list_with_room(&store).await?;
    let model = seeded_model(&store).await?;
    let (_, item) = registry::create_item(&store, &model, "warehouse").await?;

    let (room, inserted) = rooms::add_item_to_room(&store, &list, &room, &item).await?;
    assert!(inserted);
    let (room, inserted) = rooms::add_item_to_room(&store, &list, &room, &item).await?;
    assert!(!inserted);
    assert_eq!(room.item_model_id_map.len(), 1);
    assert_eq!(room.item_model_id_map.get(&item.id), Some(&model.id));
    Ok(())
}

#[tokio::test]
async fn roster_update_leaves_unrelated_room_fields_alone() -> Result<()> {
    let store = util::memory_store().await;
    let (list, room) = list_with_room(&store).await?;
    let model = seeded_model(&store).await?;
    let (_, item) = registry::create_item(&store, &model, "warehouse").await?;

    let collection = rooms_collection(PULL_LISTS, &list.id);
    let (room, _) = rooms::add_item_to_room(&store, &list, &room, &item).await?;
    let room = rooms::set_item_selected(&store, &list, &room, &item.id, true).await?;
    assert!(room.selected_item_id_set.contains(&item.id));

    // The two partial writes did not clobber each other or the name.
    let stored: Room = store
        .get(&collection, &room.id)
        .await?
        .expect("room present")
        .decode()?;
    assert_eq!(stored.room_name, "Den");
    assert_eq!(stored.item_model_id_map.len(), 1);
    assert!(stored.selected_item_id_set.contains(&item.id));
    Ok(())
}

#[tokio::test]
async fn selecting_an_item_outside_the_roster_is_rejected() -> Result<()> {
    let store = util::memory_store().await;
    let (list, room) = list_with_room(&store).await?;

    let err = rooms::set_item_selected(&store, &list, &room, "stray-item", true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ROOM/VALIDATION");

    // Deselecting something that was never selected is a quiet no-op.
    let room = rooms::set_item_selected(&store, &list, &room, "stray-item", false).await?;
    assert!(room.selected_item_id_set.is_empty());
    Ok(())
}

#[tokio::test]
async fn add_to_missing_room_is_not_found() -> Result<()> {
    let store = util::memory_store().await;
    let (list, _) = list_with_room(&store).await?;
    let ghost = Room::new("Attic", &list.id);
    let item = Item::new("m1", "warehouse");

    let err = rooms::add_item_to_room(&store, &list, &ghost, &item)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ROOM/NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn roster_resolution_batches_items_and_models() -> Result<()> {
    let store = util::memory_store().await;
    let (list, room) = list_with_room(&store).await?;
    let chair = seeded_model(&store).await?;
    let sofa = Model::new("Sofa", "seating", "grey", "fabric");
    store.set(MODELS, &sofa.id, &encode(&sofa)?).await?;

    let (_, item_a) = registry::create_item(&store, &chair, "warehouse").await?;
    let (_, item_b) = registry::create_item(&store, &chair, "warehouse").await?;
    let (_, item_c) = registry::create_item(&store, &sofa, "warehouse").await?;

    let mut room = room;
    for item in [&item_a, &item_b, &item_c] {
        let (updated, _) = rooms::add_item_to_room(&store, &list, &room, item).await?;
        room = updated;
    }

    let (items, models_by_id) = rooms::load_items_and_models(&store, &room).await?;
    assert_eq!(items.len(), 3);
    assert_eq!(models_by_id.len(), 2);
    for item in &items {
        let model = rooms::get_model_for_item(item, &models_by_id).expect("model resolved");
        assert_eq!(model.id, item.model_id);
    }
    Ok(())
}

#[tokio::test]
async fn undecodable_roster_entries_are_dropped() -> Result<()> {
    let store = util::memory_store().await;
    let (list, room) = list_with_room(&store).await?;
    let model = seeded_model(&store).await?;
    let (_, good) = registry::create_item(&store, &model, "warehouse").await?;
    let (mut room, _) = rooms::add_item_to_room(&store, &list, &room, &good).await?;

    // A roster entry whose item document no longer decodes as an Item.
    store
        .set(ITEMS, "broken", &json!({ "id": "broken", "modelId": 7 }))
        .await?;
    room.item_model_id_map
        .insert("broken".to_string(), model.id.clone());

    let (items, models_by_id) = rooms::load_items_and_models(&store, &room).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, good.id);
    assert!(models_by_id.contains_key(&model.id));
    Ok(())
}

#[tokio::test]
async fn empty_roster_resolves_to_nothing() -> Result<()> {
    let store = util::memory_store().await;
    let (_, room) = list_with_room(&store).await?;
    let (items, models_by_id) = rooms::load_items_and_models(&store, &room).await?;
    assert!(items.is_empty());
    assert!(models_by_id.is_empty());
    Ok(())
}

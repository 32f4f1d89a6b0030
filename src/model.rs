use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::id::new_uuid_v7;
use crate::time::now_ms;

/// Collection names used by the document store.
pub const MODELS: &str = "models";
pub const ITEMS: &str = "items";
pub const PULL_LISTS: &str = "pull_lists";
pub const INSTALLED_LISTS: &str = "installed_lists";

/// Normalized identity for a physical location.
///
/// Two addresses that differ only in case, whitespace or punctuation hash to
/// the same `id`. The id is computed once in the constructor and never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub formatted_address: String,
    #[serde(default)]
    pub is_warehouse: bool,
}

impl Address {
    pub fn new(street: &str, city: &str, state: &str, zip: &str, country: &str) -> Self {
        let id = address_id(&[street, city, state, zip, country]);
        let formatted = [street, city, state, zip, country]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        Address {
            id,
            formatted_address: formatted,
            is_warehouse: false,
        }
    }

    pub fn warehouse(street: &str, city: &str, state: &str, zip: &str, country: &str) -> Self {
        let mut address = Address::new(street, city, state, zip, country);
        address.is_warehouse = true;
        address
    }
}

/// Deterministic address hash: lowercase the components, strip everything
/// that is not alphanumeric, concatenate, SHA-256.
fn address_id(components: &[&str]) -> String {
    let mut normalized = String::new();
    for part in components {
        normalized.extend(
            part.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase()),
        );
    }
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

/// A named storage Address, the default custodial location for Items that
/// are not assigned to any job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub id: String,
    pub name: String,
    pub address: Address,
}

impl Warehouse {
    pub fn new(name: &str, address: Address) -> Self {
        Warehouse {
            id: address.id.clone(),
            name: name.to_string(),
            address,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    PullList,
    InstalledList,
    Storage,
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListType::PullList => "pull_list",
            ListType::InstalledList => "installed_list",
            ListType::Storage => "storage",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    Planning,
    Staging,
    Installed,
    Unstaged,
}

impl ListStatus {
    /// Which representation a list in this status lives in. An uninstalled
    /// list is duplicated back into the pull-list collection so it can be
    /// restaged, so `unstaged` is a pull list again.
    pub fn list_type(self) -> ListType {
        match self {
            ListStatus::Planning | ListStatus::Staging | ListStatus::Unstaged => {
                ListType::PullList
            }
            ListStatus::Installed => ListType::InstalledList,
        }
    }

    /// The collection that stores lists of this status.
    pub fn collection(self) -> &'static str {
        match self.list_type() {
            ListType::PullList | ListType::Storage => PULL_LISTS,
            ListType::InstalledList => INSTALLED_LISTS,
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListStatus::Planning => "planning",
            ListStatus::Staging => "staging",
            ListStatus::Installed => "installed",
            ListStatus::Unstaged => "unstaged",
        };
        f.write_str(s)
    }
}

/// A job record: a pull list being staged for delivery, or an installed list
/// documenting a completed installation.
///
/// `id` is stable across lifecycle transitions; duplication into the other
/// collection carries `id`, `address`, `created_date` and `room_ids`
/// verbatim and only changes `status`/`list_type` plus the transition date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdList {
    pub id: String,
    pub list_type: ListType,
    pub address: Address,
    pub address_id: String,
    pub created_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_date: Option<i64>,
    pub status: ListStatus,
    pub client: String,
    #[serde(default)]
    pub room_ids: Vec<String>,
}

impl RdList {
    /// Fresh pull list in `planning` with no rooms.
    pub fn new(address: Address, client: &str) -> Self {
        let address_id = address.id.clone();
        RdList {
            id: new_uuid_v7(),
            list_type: ListType::PullList,
            address,
            address_id,
            created_date: now_ms(),
            install_date: None,
            uninstall_date: None,
            status: ListStatus::Planning,
            client: client.to_string(),
            room_ids: Vec::new(),
        }
    }

    pub fn collection(&self) -> &'static str {
        self.status.collection()
    }
}

/// Normalized room id: trimmed, lowercased, whitespace runs become hyphens.
pub fn normalize_room_id(room_name: &str) -> String {
    room_name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// A named subdivision of a List's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub room_name: String,
    pub list_id: String,
    /// Membership roster: item id -> model id.
    #[serde(default)]
    pub item_model_id_map: BTreeMap<String, String>,
    /// Subset of the roster currently staged for action.
    #[serde(default)]
    pub selected_item_id_set: BTreeSet<String>,
}

impl Room {
    pub fn new(room_name: &str, list_id: &str) -> Self {
        Room {
            id: normalize_room_id(room_name),
            room_name: room_name.trim().to_string(),
            list_id: list_id.to_string(),
            item_model_id_map: BTreeMap::new(),
            selected_item_id_set: BTreeSet::new(),
        }
    }
}

/// One physical unit of a Model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    /// Owning model; immutable after creation.
    pub model_id: String,
    /// Current custodial location: a warehouse address id or a List id.
    pub list_id: String,
    #[serde(default)]
    pub attention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_reason: Option<String>,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Item {
    pub fn new(model_id: &str, location_id: &str) -> Self {
        Item {
            id: new_uuid_v7(),
            model_id: model_id.to_string(),
            list_id: location_id.to_string(),
            attention: false,
            attention_reason: None,
            is_available: true,
            image: None,
        }
    }
}

/// A catalog template that many physical Items instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    /// Derived; the prefix-search field.
    pub name_lowercased: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub primary_color: String,
    pub primary_material: String,
    /// Roster of all Items ever created for this Model.
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub available_item_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_image: Option<String>,
    #[serde(default)]
    pub secondary_images: Vec<String>,
}

impl Model {
    pub fn new(name: &str, model_type: &str, primary_color: &str, primary_material: &str) -> Self {
        Model {
            id: new_uuid_v7(),
            name: name.to_string(),
            name_lowercased: name.to_lowercase(),
            model_type: model_type.to_string(),
            primary_color: primary_color.to_string(),
            primary_material: primary_material.to_string(),
            item_ids: Vec::new(),
            available_item_count: 0,
            primary_image: None,
            secondary_images: Vec::new(),
        }
    }
}

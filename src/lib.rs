pub mod db;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod logging;
pub mod media;
pub mod model;
pub mod pagination;
pub mod registry;
pub mod rooms;
pub mod store;
pub mod time;

pub use error::{AppError, AppResult};
pub use lifecycle::TransitionError;
pub use media::MediaStore;
pub use model::{
    normalize_room_id, Address, Item, ListStatus, ListType, Model, RdList, Room, Warehouse,
    INSTALLED_LISTS, ITEMS, MODELS, PULL_LISTS,
};
pub use pagination::{Page, Pager, PAGE_SIZE};
pub use store::{
    encode, rooms_collection, ChangeKind, Cursor, DocChange, Document, Field, Filter, Query,
    Store, Subscription, WriteBatch,
};

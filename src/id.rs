use uuid::Uuid;

/// Fresh time-ordered id for new Lists, Items and Models.
///
/// UUIDv7 keeps insertion order roughly monotonic, which keeps the
/// `createdDate` sort stable for records created in the same millisecond.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Hard limits on caller input. Everything above these is rejected before
/// the store is touched.
pub const MAX_ROOMS: usize = 1_000;
pub const MAX_ROOM_NAME_LEN: usize = 255;
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 50_000;

/// Longest single stay, in days (both ends counted).
pub const MAX_STAY_DAYS: i64 = 366;
/// Widest availability / restriction query, in days.
pub const MAX_QUERY_DAYS: i64 = 3 * 366;
/// Earliest and latest years a date may fall in.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

pub const MIN_FIRST_NAME_LEN: usize = 3;
pub const MAX_GUEST_FIELD_LEN: usize = 255;

/// Most day selections accepted in one calendar submission for one room.
pub const MAX_CALENDAR_SELECTIONS: usize = 31;

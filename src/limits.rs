/// Longest stay, in inventory rows (check-in through check-out).
pub const MAX_STAY_ROWS: i64 = 90;
pub const MAX_ROOMS_PER_BOOKING: u32 = 50;
pub const MAX_GUESTS_PER_BOOKING: usize = 20;
pub const MAX_INVENTORY_DAYS: u32 = 730;
pub const DEFAULT_INVENTORY_DAYS: u32 = 365;
pub const MAX_ROOM_CAPACITY: u32 = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GUEST_AGE: u32 = 150;
pub const MAX_REQUEST_LINE_BYTES: usize = 64 * 1024;

//! Hard caps on input sizes and table growth.

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_ROOM_NAME_LEN: usize = 255;

/// Longest stay a single reservation may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

/// Keys a single session may hold.
pub const MAX_SESSION_KEYS: usize = 64;

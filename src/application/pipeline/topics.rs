//! Broker topics and consumer groups

pub const VALIDATE: &str = "validate";
pub const DATA: &str = "data";
pub const MAILING: &str = "mailing";
pub const ERROR: &str = "error";

pub const GROUP_VALIDATE: &str = "group_validate";
pub const GROUP_DATA: &str = "group_data";
pub const GROUP_MAILING: &str = "group_mailing";

pub mod fs;
pub mod time;

pub use fs::{path_component, write_atomic};
pub use time::{next_boundary, parse_event_time, truncate_to_minute, window_end};

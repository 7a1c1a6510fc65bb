mod entry;
mod sample;

pub use entry::{FavouriteEntry, ScheduledEntry};
pub use sample::Sample;

//! Data models for audio tracks and container inventories.

mod enums;
mod media;

pub use enums::AudioFormat;
pub use media::{AudioTrack, TrackInventory};

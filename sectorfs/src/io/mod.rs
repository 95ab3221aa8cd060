mod block;
mod diskemu;

pub use block::{SectorNumber, SectorStorage};
pub use diskemu::{DiskEmulator, DiskEmulatorBuilder, NUM_SECTORS, SECTOR_SIZE};

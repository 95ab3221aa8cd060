//! A small sector-based file system in the style of a teaching operating system.
//!
//! Files have a size fixed at creation and are described by a one-sector header
//! that points at their data directly, through one index sector, or through a
//! two level index. Free sectors are tracked in a bitmap stored in a file of its
//! own; directories are fixed-size tables stored in files as well.
#[macro_use]
extern crate log;

pub mod alloc;
pub mod directory;
mod error;
pub mod fs;
pub mod header;
pub mod io;
pub mod openfile;
pub mod process;
pub mod syscall;

pub use crate::error::FsError;
pub use crate::fs::{FileSystem, SharedFileSystem, DIRECTORY_SECTOR, FREE_MAP_SECTOR};
pub use crate::io::{DiskEmulator, DiskEmulatorBuilder, SectorNumber, SectorStorage};
pub use crate::openfile::OpenFile;
pub use crate::process::{Fd, Pid, Process};
pub use crate::syscall::{dispatch, Syscall};

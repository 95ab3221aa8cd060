use std::fmt::Write;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::FsError;
use crate::header::FileHeader;
use crate::io::{SectorNumber, SectorStorage};
use crate::openfile::OpenFile;

/// Longest name an entry keeps. Longer names are cut to this many bytes.
pub const FILE_NAME_MAX_LEN: usize = 9;
/// Entries in every directory table, fixed when the directory is created.
pub const NUM_DIR_ENTRIES: usize = 10;

/// On-disk form of one table slot.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug)]
struct RawEntry {
    sector: u32,
    in_use: u8,
    is_directory: u8,
    /// NUL padded.
    name: [u8; FILE_NAME_MAX_LEN + 1],
}

pub const ENTRY_SIZE: usize = size_of::<RawEntry>();

/// Cuts `name` to the bounded length, backing off to a character boundary.
pub fn bounded(name: &str) -> &str {
    if name.len() <= FILE_NAME_MAX_LEN {
        return name;
    }
    let mut end = FILE_NAME_MAX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub sector: SectorNumber,
    pub is_directory: bool,
}

impl DirectoryEntry {
    fn encode(&self) -> RawEntry {
        let mut name = [0; FILE_NAME_MAX_LEN + 1];
        let bytes = self.name.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        RawEntry {
            sector: self.sector as u32,
            in_use: 1,
            is_directory: self.is_directory as u8,
            name,
        }
    }

    fn decode(raw: &RawEntry) -> Option<Self> {
        if raw.in_use == 0 {
            return None;
        }
        let len = raw.name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_MAX_LEN);
        Some(Self {
            name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
            sector: raw.sector as SectorNumber,
            is_directory: raw.is_directory != 0,
        })
    }

    fn is_link(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// A fixed-capacity table of name to header sector bindings. The table is read
/// and written as a whole through the directory's own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    table: Vec<Option<DirectoryEntry>>,
}

impl Directory {
    /// An empty table with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: vec![None; capacity],
        }
    }

    /// Bytes the backing file of a `capacity` slot directory must hold.
    pub fn file_size(capacity: usize) -> usize {
        capacity * ENTRY_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Replaces the in-memory table with the one stored in `file`.
    pub fn fetch_from<T: SectorStorage>(&mut self, file: &OpenFile, dev: &mut T) -> Result<(), FsError> {
        let mut buf = vec![0; Self::file_size(self.capacity())];
        file.read_at(dev, &mut buf, 0)?;
        for (slot, chunk) in self.table.iter_mut().zip(buf.chunks_exact(ENTRY_SIZE)) {
            *slot = RawEntry::read_from(chunk)
                .as_ref()
                .and_then(DirectoryEntry::decode);
        }
        Ok(())
    }

    /// Writes the whole table to `file`.
    pub fn write_back<T: SectorStorage>(&self, file: &OpenFile, dev: &mut T) -> Result<(), FsError> {
        let mut buf = Vec::with_capacity(Self::file_size(self.capacity()));
        for slot in &self.table {
            match slot {
                Some(entry) => buf.extend_from_slice(entry.encode().as_bytes()),
                None => buf.extend_from_slice(RawEntry::new_zeroed().as_bytes()),
            }
        }
        file.write_at(dev, &buf, 0)?;
        Ok(())
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        let name = bounded(name);
        self.table
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.name == name))
    }

    /// Header sector bound to `name`, if any.
    pub fn find(&self, name: &str) -> Option<SectorNumber> {
        self.find_index(name)
            .and_then(|i| self.table[i].as_ref())
            .map(|entry| entry.sector)
    }

    pub fn add(&mut self, name: &str, sector: SectorNumber) -> Result<(), FsError> {
        self.insert(name, sector, false)
    }

    pub fn add_subdirectory(&mut self, name: &str, sector: SectorNumber) -> Result<(), FsError> {
        self.insert(name, sector, true)
    }

    fn insert(&mut self, name: &str, sector: SectorNumber, is_directory: bool) -> Result<(), FsError> {
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(FsError::DirectoryFull)?;
        *slot = Some(DirectoryEntry {
            name: bounded(name).to_string(),
            sector,
            is_directory,
        });
        Ok(())
    }

    /// Drops the binding for `name`, returning the sector it named.
    pub fn remove(&mut self, name: &str) -> Result<SectorNumber, FsError> {
        let index = self.find_index(name).ok_or(FsError::NotFound)?;
        let entry = self.table[index].take().ok_or(FsError::NotFound)?;
        Ok(entry.sector)
    }

    pub fn is_directory(&self, name: &str) -> bool {
        self.find_index(name)
            .and_then(|i| self.table[i].as_ref())
            .map_or(false, |entry| entry.is_directory)
    }

    /// True when nothing but `.` and `..` is left.
    pub fn is_empty(&self) -> bool {
        self.entries().all(DirectoryEntry::is_link)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.table.iter().flatten()
    }

    /// Names in table order.
    pub fn list(&self) -> Vec<String> {
        self.entries().map(|entry| entry.name.clone()).collect()
    }

    /// Every entry, followed by the header dump of each file or directory it names.
    pub fn print<T: SectorStorage>(&self, dev: &mut T) -> Result<String, FsError> {
        let mut out = String::from("Directory contents:\n");
        for entry in self.entries() {
            let kind = if entry.is_directory { "dir" } else { "file" };
            let _ = writeln!(out, "Name: {}, Sector: {}, Kind: {}", entry.name, entry.sector, kind);
            if !entry.is_link() {
                out.push_str(&FileHeader::fetch_from(dev, entry.sector)?.describe(dev)?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::header::Geometry;
    use crate::io::{DiskEmulator, DiskEmulatorBuilder};

    fn directory_file() -> (DiskEmulator, OpenFile) {
        let mut dev = DiskEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_sectors(64)
            .build()
            .unwrap();
        let mut bitmap = Bitmap::new(64);
        bitmap.mark(0);
        bitmap.mark(1);
        let size = Directory::file_size(NUM_DIR_ENTRIES);
        let tree = FileHeader::allocate(&mut bitmap, size, Geometry::of(&dev)).unwrap();
        tree.write_back(&mut dev, 1).unwrap();
        (dev, OpenFile::new(1))
    }

    #[test]
    fn entries_are_sixteen_bytes() {
        assert_eq!(ENTRY_SIZE, 16);
    }

    #[test]
    fn can_add_find_and_remove_entries() {
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        dir.add("foo", 7).unwrap();
        dir.add_subdirectory("bar", 9).unwrap();

        assert_eq!(dir.find("foo"), Some(7));
        assert_eq!(dir.find("bar"), Some(9));
        assert!(dir.is_directory("bar"));
        assert!(!dir.is_directory("foo"));
        assert!(!dir.is_directory("missing"));

        assert_eq!(dir.remove("foo").unwrap(), 7);
        assert_eq!(dir.find("foo"), None);
        assert!(matches!(dir.remove("foo"), Err(FsError::NotFound)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut dir = Directory::new(4);
        dir.add("foo", 7).unwrap();
        assert!(matches!(dir.add("foo", 8), Err(FsError::AlreadyExists)));
        assert!(matches!(dir.add_subdirectory("foo", 8), Err(FsError::AlreadyExists)));
        assert_eq!(dir.find("foo"), Some(7));
    }

    #[test]
    fn full_table_rejects_new_entries_and_reuses_freed_slots() {
        let mut dir = Directory::new(2);
        dir.add("a", 2).unwrap();
        dir.add("b", 3).unwrap();
        assert!(matches!(dir.add("c", 4), Err(FsError::DirectoryFull)));

        dir.remove("a").unwrap();
        dir.add("c", 4).unwrap();
        assert_eq!(dir.list(), vec!["c", "b"]);
    }

    #[test]
    fn long_names_match_on_their_bounded_prefix() {
        let mut dir = Directory::new(4);
        dir.add("abcdefghijk", 5).unwrap();
        assert_eq!(dir.list(), vec!["abcdefghi"]);
        assert_eq!(dir.find("abcdefghi"), Some(5));
        assert_eq!(dir.find("abcdefghiXYZ"), Some(5));
        assert_eq!(bounded("ééééé"), "éééé");
    }

    #[test]
    fn only_links_means_empty() {
        let mut dir = Directory::new(4);
        dir.add_subdirectory(".", 5).unwrap();
        dir.add_subdirectory("..", 1).unwrap();
        assert!(dir.is_empty());

        dir.add("x", 6).unwrap();
        assert!(!dir.is_empty());
    }

    #[test]
    fn table_persists_through_its_file() {
        let (mut dev, file) = directory_file();
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        dir.add_subdirectory(".", 1).unwrap();
        dir.add_subdirectory("..", 1).unwrap();
        dir.add("notes", 12).unwrap();
        dir.write_back(&file, &mut dev).unwrap();

        let mut fetched = Directory::new(NUM_DIR_ENTRIES);
        fetched.fetch_from(&file, &mut dev).unwrap();
        assert_eq!(fetched, dir);
        assert_eq!(fetched.find("notes"), Some(12));
        assert!(fetched.is_directory(".."));
    }

    #[test]
    fn unsaved_changes_are_lost() {
        let (mut dev, file) = directory_file();
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        dir.write_back(&file, &mut dev).unwrap();

        dir.add("scratch", 20).unwrap();
        dir.fetch_from(&file, &mut dev).unwrap();
        assert_eq!(dir.find("scratch"), None);
    }
}

//! Open file bookkeeping shared between the file system and user processes.
//!
//! Each process owns a small descriptor table. The file system owns one
//! system-wide table with an entry per open name, which records the process that
//! opened it. Neither table counts references: a name is released once a scan of
//! the owner's descriptors finds nothing left that refers to it.

use crate::io::SectorNumber;
use crate::openfile::OpenFile;

pub const MAX_OPEN_FILES_IN_SYSTEM: usize = 10;
pub const MAX_OPEN_FILES_IN_PROCESS: usize = 10;

pub type Pid = u32;
/// Index into a process's descriptor table.
pub type Fd = usize;

/// A name as resolved in one directory, identified by that directory's header
/// sector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub directory: SectorNumber,
    pub name: String,
}

#[derive(Debug)]
pub struct ProcessFileEntry {
    pub key: FileKey,
    pub file: OpenFile,
}

/// Descriptor table of a single process.
#[derive(Debug)]
pub struct ProcessOpenFiles {
    slots: Vec<Option<ProcessFileEntry>>,
}

impl ProcessOpenFiles {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Stores `file` in the lowest free slot and returns it as the descriptor.
    pub fn add(&mut self, key: FileKey, file: OpenFile) -> Option<Fd> {
        let fd = self.slots.iter().position(Option::is_none)?;
        self.slots[fd] = Some(ProcessFileEntry { key, file });
        Some(fd)
    }

    /// Lowest descriptor open on `key`.
    pub fn find(&self, key: &FileKey) -> Option<Fd> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if &entry.key == key))
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut ProcessFileEntry> {
        self.slots.get_mut(fd).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, fd: Fd) -> Option<ProcessFileEntry> {
        self.slots.get_mut(fd).and_then(Option::take)
    }

    pub fn is_open(&self, fd: Fd) -> bool {
        matches!(self.slots.get(fd), Some(Some(_)))
    }

    /// Descriptors currently in use, lowest first.
    pub fn open_descriptors(&self) -> Vec<Fd> {
        (0..self.slots.len()).filter(|&fd| self.is_open(fd)).collect()
    }
}

/// A user process as far as the file system is concerned.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    pub files: ProcessOpenFiles,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            files: ProcessOpenFiles::new(MAX_OPEN_FILES_IN_PROCESS),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFileEntry {
    pub key: FileKey,
    pub owner: Pid,
}

/// The system-wide table, one entry per open name.
#[derive(Debug)]
pub struct SystemOpenFiles {
    slots: Vec<Option<SystemFileEntry>>,
}

impl SystemOpenFiles {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn find(&self, key: &FileKey) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if &entry.key == key))
    }

    pub fn add(&mut self, key: FileKey, owner: Pid) -> Option<usize> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(SystemFileEntry { key, owner });
        Some(index)
    }

    pub fn release(&mut self, index: usize) -> Option<SystemFileEntry> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Drops every entry owned by `pid`, returning how many there were.
    pub fn release_process(&mut self, pid: Pid) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(entry) if entry.owner == pid) {
                *slot = None;
                released += 1;
            }
        }
        released
    }

    pub fn entries(&self) -> impl Iterator<Item = &SystemFileEntry> {
        self.slots.iter().flatten()
    }
}

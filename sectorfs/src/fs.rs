use std::fmt::Write;
use std::sync::{Arc, Mutex};

use crate::alloc::Bitmap;
use crate::directory::{bounded, Directory, NUM_DIR_ENTRIES};
use crate::error::FsError;
use crate::header::{FileHeader, Geometry};
use crate::io::{SectorNumber, SectorStorage};
use crate::openfile::OpenFile;
use crate::process::{Fd, FileKey, Process, SystemOpenFiles, MAX_OPEN_FILES_IN_SYSTEM};

/// Known locations.
pub const FREE_MAP_SECTOR: SectorNumber = 0;
pub const DIRECTORY_SECTOR: SectorNumber = 1;

/// A file system behind one global lock. Every operation is run while holding it.
pub type SharedFileSystem<T> = Arc<Mutex<FileSystem<T>>>;

/// Maps names to files on a sectored disk.
///
/// # Layout
/// ==============================================================================
/// | Bitmap header (0) | Root directory header (1) | Everything else, on demand  |
/// ==============================================================================
///
/// The bitmap and the current directory are kept open for the lifetime of the
/// file system. Both are read from disk at the start of each operation and
/// written back only once the operation is sure to succeed, so a failed
/// operation leaves the disk untouched.
///
/// Every mutating operation takes `&mut self`; that exclusive borrow is the one
/// serialization point. Share a file system between threads through
/// [`FileSystem::into_shared`].
pub struct FileSystem<T: SectorStorage> {
    dev: T,
    geometry: Geometry,
    free_map_file: OpenFile,
    directory_file: OpenFile,
    open_files: SystemOpenFiles,
}

fn check_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.contains('\0') {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn is_link(name: &str) -> bool {
    name == "." || name == ".."
}

impl<T: SectorStorage> FileSystem<T> {
    /// Lays out an empty file system on `dev`: a bitmap file and a root directory
    /// holding only `.` and `..`.
    pub fn format(mut dev: T) -> Result<Self, FsError> {
        let geometry = Geometry::of(&dev);
        let num_sectors = dev.num_sectors();
        info!(
            "formatting {} sectors of {} bytes",
            num_sectors,
            geometry.sector_size()
        );

        let mut bitmap = Bitmap::new(num_sectors);
        // The two headers must be locatable before anything else exists.
        bitmap.mark(FREE_MAP_SECTOR);
        bitmap.mark(DIRECTORY_SECTOR);
        let map_tree = FileHeader::allocate(&mut bitmap, Bitmap::file_size(num_sectors), geometry)?;
        let dir_tree = FileHeader::allocate(
            &mut bitmap,
            Directory::file_size(NUM_DIR_ENTRIES),
            geometry,
        )?;
        map_tree.write_back(&mut dev, FREE_MAP_SECTOR)?;
        dir_tree.write_back(&mut dev, DIRECTORY_SECTOR)?;

        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.add_subdirectory(".", DIRECTORY_SECTOR)?;
        directory.add_subdirectory("..", DIRECTORY_SECTOR)?;

        let mut fs = Self::with_files(dev, geometry);
        bitmap.write_back(&fs.free_map_file, &mut fs.dev)?;
        directory.write_back(&fs.directory_file, &mut fs.dev)?;
        fs.dev.sync_disk()?;
        Ok(fs)
    }

    /// Opens a disk that already holds a file system.
    pub fn mount(dev: T) -> Result<Self, FsError> {
        let geometry = Geometry::of(&dev);
        info!("mounting {} sectors", dev.num_sectors());
        let mut fs = Self::with_files(dev, geometry);
        FileHeader::fetch_from(&mut fs.dev, FREE_MAP_SECTOR)?;
        // A formatted root always links to itself.
        if fs.load_directory()?.find(".") != Some(DIRECTORY_SECTOR) {
            return Err(FsError::Corrupt(DIRECTORY_SECTOR));
        }
        Ok(fs)
    }

    fn with_files(dev: T, geometry: Geometry) -> Self {
        Self {
            dev,
            geometry,
            free_map_file: OpenFile::new(FREE_MAP_SECTOR),
            directory_file: OpenFile::new(DIRECTORY_SECTOR),
            open_files: SystemOpenFiles::new(MAX_OPEN_FILES_IN_SYSTEM),
        }
    }

    pub fn into_shared(self) -> SharedFileSystem<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn device(&mut self) -> &mut T {
        &mut self.dev
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Header sector of the current directory.
    pub fn current_directory(&self) -> SectorNumber {
        self.directory_file.sector()
    }

    pub fn open_files(&self) -> &SystemOpenFiles {
        &self.open_files
    }

    fn load_bitmap(&mut self) -> Result<Bitmap, FsError> {
        let num_sectors = self.dev.num_sectors();
        Bitmap::fetch_from(&self.free_map_file, &mut self.dev, num_sectors)
    }

    fn load_directory(&mut self) -> Result<Directory, FsError> {
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(&self.directory_file, &mut self.dev)?;
        Ok(directory)
    }

    pub fn free_sectors(&mut self) -> Result<usize, FsError> {
        Ok(self.load_bitmap()?.num_clear())
    }

    /// Creates a file of fixed `size` in the current directory.
    ///
    /// Fails if the name is taken, if there is no sector for the header, if the
    /// directory is full, or if the data does not fit on disk.
    pub fn create(&mut self, name: &str, size: usize) -> Result<(), FsError> {
        check_name(name)?;
        info!("creating file {}, size {}", name, size);
        let mut directory = self.load_directory()?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let mut bitmap = self.load_bitmap()?;
        let sector = bitmap.find().ok_or(FsError::InsufficientSpace)?;
        directory.add(name, sector)?;
        let tree = FileHeader::allocate(&mut bitmap, size, self.geometry)?;

        // Everything worked, flush all changes back to disk.
        tree.write_back(&mut self.dev, sector)?;
        directory.write_back(&self.directory_file, &mut self.dev)?;
        bitmap.write_back(&self.free_map_file, &mut self.dev)?;
        Ok(())
    }

    /// Looks `name` up in the current directory.
    pub fn open(&mut self, name: &str) -> Result<OpenFile, FsError> {
        debug!("opening file {}", name);
        let directory = self.load_directory()?;
        directory
            .find(name)
            .map(OpenFile::new)
            .ok_or(FsError::NotFound)
    }

    pub fn read(&mut self, file: &mut OpenFile, buf: &mut [u8]) -> Result<usize, FsError> {
        file.read(&mut self.dev, buf)
    }

    pub fn write(&mut self, file: &mut OpenFile, buf: &[u8]) -> Result<usize, FsError> {
        file.write(&mut self.dev, buf)
    }

    /// Deletes a file, or a directory holding nothing but `.` and `..`, from the
    /// current directory and frees all of its sectors.
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        check_name(name)?;
        if is_link(name) {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let mut directory = self.load_directory()?;
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        if directory.is_directory(name) {
            let mut subdirectory = Directory::new(NUM_DIR_ENTRIES);
            subdirectory.fetch_from(&OpenFile::new(sector), &mut self.dev)?;
            if !subdirectory.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }
        info!("removing {} (header {})", name, sector);

        let header = FileHeader::fetch_from(&mut self.dev, sector)?;
        let mut bitmap = self.load_bitmap()?;
        header.deallocate(&mut self.dev, &mut bitmap)?;
        assert!(bitmap.test(sector), "header sector {} ought to be marked", sector);
        bitmap.clear(sector);
        directory.remove(name)?;

        bitmap.write_back(&self.free_map_file, &mut self.dev)?;
        directory.write_back(&self.directory_file, &mut self.dev)?;
        Ok(())
    }

    /// Names in the current directory.
    pub fn list(&mut self) -> Result<Vec<String>, FsError> {
        Ok(self.load_directory()?.list())
    }

    /// Everything about the file system: the bitmap and directory headers, the
    /// allocated sectors, and every file in the current directory.
    pub fn print(&mut self) -> Result<String, FsError> {
        let mut out = String::from("Bit map file header:\n");
        let map_header = FileHeader::fetch_from(&mut self.dev, FREE_MAP_SECTOR)?;
        out.push_str(&map_header.describe(&mut self.dev)?);

        out.push_str("Directory file header:\n");
        let current = self.current_directory();
        let dir_header = FileHeader::fetch_from(&mut self.dev, current)?;
        out.push_str(&dir_header.describe(&mut self.dev)?);

        let bitmap = self.load_bitmap()?;
        let used: Vec<String> = bitmap.used().map(|s| s.to_string()).collect();
        let _ = writeln!(out, "Bitmap set:\n{}", used.join(", "));

        let directory = self.load_directory()?;
        out.push_str(&directory.print(&mut self.dev)?);
        Ok(out)
    }

    /// Creates a subdirectory of the current directory.
    pub fn make_directory(&mut self, name: &str) -> Result<(), FsError> {
        check_name(name)?;
        info!("creating directory {}", name);
        let mut directory = self.load_directory()?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let mut bitmap = self.load_bitmap()?;
        let sector = bitmap.find().ok_or(FsError::InsufficientSpace)?;
        directory.add_subdirectory(name, sector)?;
        let tree = FileHeader::allocate(
            &mut bitmap,
            Directory::file_size(NUM_DIR_ENTRIES),
            self.geometry,
        )?;

        tree.write_back(&mut self.dev, sector)?;
        directory.write_back(&self.directory_file, &mut self.dev)?;
        bitmap.write_back(&self.free_map_file, &mut self.dev)?;

        let mut subdirectory = Directory::new(NUM_DIR_ENTRIES);
        subdirectory.add_subdirectory(".", sector)?;
        subdirectory.add_subdirectory("..", self.current_directory())?;
        subdirectory.write_back(&OpenFile::new(sector), &mut self.dev)?;
        Ok(())
    }

    /// Makes the named subdirectory (or `.`/`..`) the current directory.
    pub fn change_directory(&mut self, name: &str) -> Result<(), FsError> {
        check_name(name)?;
        let directory = self.load_directory()?;
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        if !directory.is_directory(name) {
            return Err(FsError::NotADirectory);
        }
        info!("changing directory to {} (header {})", name, sector);
        self.directory_file = OpenFile::new(sector);
        Ok(())
    }

    fn key_for(&self, name: &str) -> FileKey {
        FileKey {
            directory: self.current_directory(),
            name: bounded(name).to_string(),
        }
    }

    /// Opens `name` for `process`, creating it with `size` bytes first when
    /// `create` is set and it does not exist. A name open in another process
    /// cannot be opened.
    pub fn open_syscall(
        &mut self,
        process: &mut Process,
        name: &str,
        create: bool,
        size: usize,
    ) -> Result<Fd, FsError> {
        check_name(name)?;
        let key = self.key_for(name);
        if self.open_files.find(&key).is_some() && process.files.find(&key).is_none() {
            return Err(FsError::AlreadyOpenElsewhere);
        }

        let file = match self.open(name) {
            Ok(file) => file,
            Err(FsError::NotFound) if create => {
                self.create(name, size)?;
                self.open(name)?
            }
            Err(err) => return Err(err),
        };

        let registered = match self.open_files.find(&key) {
            Some(_) => None,
            None => Some(
                self.open_files
                    .add(key.clone(), process.pid())
                    .ok_or(FsError::OpenTableFull)?,
            ),
        };
        match process.files.add(key, file) {
            Some(fd) => {
                debug!("process {} opened {} as {}", process.pid(), name, fd);
                Ok(fd)
            }
            None => {
                if let Some(index) = registered {
                    self.open_files.release(index);
                }
                Err(FsError::OpenTableFull)
            }
        }
    }

    pub fn read_syscall(&mut self, process: &mut Process, fd: Fd, buf: &mut [u8]) -> Result<usize, FsError> {
        let entry = process
            .files
            .get_mut(fd)
            .ok_or(FsError::InvalidDescriptor(fd))?;
        entry.file.read(&mut self.dev, buf)
    }

    pub fn write_syscall(&mut self, process: &mut Process, fd: Fd, buf: &[u8]) -> Result<usize, FsError> {
        let entry = process
            .files
            .get_mut(fd)
            .ok_or(FsError::InvalidDescriptor(fd))?;
        entry.file.write(&mut self.dev, buf)
    }

    pub fn lseek_syscall(&mut self, process: &mut Process, fd: Fd, offset: usize) -> Result<(), FsError> {
        let entry = process
            .files
            .get_mut(fd)
            .ok_or(FsError::InvalidDescriptor(fd))?;
        entry.file.seek(offset);
        Ok(())
    }

    /// Closes `fd`. The system-wide entry goes away with the process's last
    /// descriptor on the same name.
    pub fn close_syscall(&mut self, process: &mut Process, fd: Fd) -> Result<(), FsError> {
        let entry = process
            .files
            .remove(fd)
            .ok_or(FsError::InvalidDescriptor(fd))?;
        if process.files.find(&entry.key).is_none() {
            match self.open_files.find(&entry.key) {
                Some(index) => {
                    self.open_files.release(index);
                }
                None => panic!("{:?} open in process {} but not system wide", entry.key, process.pid()),
            }
        }
        debug!("process {} closed {}", process.pid(), fd);
        Ok(())
    }

    pub fn make_directory_syscall(&mut self, name: &str) -> Result<(), FsError> {
        self.make_directory(name)
    }

    pub fn change_directory_syscall(&mut self, name: &str) -> Result<(), FsError> {
        self.change_directory(name)
    }

    /// Removes a file or an empty directory unless some process has it open.
    pub fn remove_syscall(&mut self, name: &str) -> Result<(), FsError> {
        if is_link(name) {
            return Err(FsError::InvalidName(name.to_string()));
        }
        if self.open_files.find(&self.key_for(name)).is_some() {
            return Err(FsError::Busy);
        }
        self.remove(name)
    }

    /// Drops every descriptor `process` still holds and every system-wide entry
    /// it owns. Returns how many descriptors were closed.
    pub fn exit_process(&mut self, process: &mut Process) -> usize {
        let descriptors = process.files.open_descriptors();
        for &fd in &descriptors {
            process.files.remove(fd);
        }
        let released = self.open_files.release_process(process.pid());
        debug!(
            "process {} exited, closed {} descriptors and {} names",
            process.pid(),
            descriptors.len(),
            released
        );
        descriptors.len()
    }
}

//! File headers (i-nodes).
//!
//! A header occupies exactly one sector: the byte length of the file, its sector
//! count, and `D` sector pointers, where `D` is however many `u32` slots fit in the
//! rest of the sector. How the pointers are read depends only on the sector count:
//!
//! ==============================================================================
//! | Direct          | n <= D          | pointers[0..n) are data sectors          |
//! | Single indirect | n <= 2D - 1     | pointers[0..D-1) data, pointers[D-1] an  |
//! |                 |                 | index block holding the other n-(D-1)    |
//! | Double indirect | n <= 2D-2 + D^2 | pointers[0..D-2) data, pointers[D-2] an  |
//! |                 |                 | index block of D data sectors,           |
//! |                 |                 | pointers[D-1] a table of index blocks    |
//! ==============================================================================
//!
//! An index block uses the header record format as a plain pointer table. Index
//! blocks are never cached: every lookup through them reads them from disk.

use std::fmt::Write;

use crate::alloc::Bitmap;
use crate::error::FsError;
use crate::io::{SectorNumber, SectorStorage};

/// Bytes taken by the byte length and sector count fields of a record.
const LENGTH_FIELDS: usize = 8;
/// Smallest sector able to hold a double indirect layout (D >= 2).
pub const MIN_SECTOR_SIZE: usize = LENGTH_FIELDS + 2 * 4;
/// Largest sector whose biggest file still has a byte length that fits the
/// record's `u32` field.
pub const MAX_SECTOR_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    sector_size: usize,
}

impl Geometry {
    pub fn new(sector_size: usize) -> Self {
        assert!(
            (MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size) && sector_size % 4 == 0,
            "unsupported sector size {}",
            sector_size
        );
        Self { sector_size }
    }

    pub fn of<T: SectorStorage>(dev: &T) -> Self {
        Self::new(dev.sector_size())
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Pointer slots per record, `D`.
    pub fn num_direct(&self) -> usize {
        (self.sector_size - LENGTH_FIELDS) / 4
    }

    /// Largest sector count the single indirect tier covers.
    pub fn single_indirect_cap(&self) -> usize {
        2 * self.num_direct() - 1
    }

    /// Largest sector count any file may have.
    pub fn double_indirect_cap(&self) -> usize {
        let d = self.num_direct();
        2 * d - 2 + d * d
    }

    pub fn max_file_size(&self) -> usize {
        self.double_indirect_cap() * self.sector_size
    }

    pub fn sectors_for(&self, num_bytes: usize) -> usize {
        num_bytes / self.sector_size + (num_bytes % self.sector_size != 0) as usize
    }

    pub fn tier(&self, num_sectors: usize) -> Option<Tier> {
        if num_sectors <= self.num_direct() {
            Some(Tier::Direct)
        } else if num_sectors <= self.single_indirect_cap() {
            Some(Tier::SingleIndirect)
        } else if num_sectors <= self.double_indirect_cap() {
            Some(Tier::DoubleIndirect)
        } else {
            None
        }
    }

    /// Index block sectors a file of `num_sectors` needs on top of its data.
    pub fn index_sectors(&self, num_sectors: usize) -> Option<usize> {
        let d = self.num_direct();
        self.tier(num_sectors).map(|tier| match tier {
            Tier::Direct => 0,
            Tier::SingleIndirect => 1,
            Tier::DoubleIndirect => 2 + (num_sectors - (2 * d - 2) + d - 1) / d,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Direct,
    SingleIndirect,
    DoubleIndirect,
}

/// Interpretation of a header's pointer slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Direct {
        data: Vec<SectorNumber>,
    },
    SingleIndirect {
        direct: Vec<SectorNumber>,
        index: SectorNumber,
    },
    DoubleIndirect {
        direct: Vec<SectorNumber>,
        single: SectorNumber,
        double: SectorNumber,
    },
}

/// The fixed-width on-disk record shared by headers and index blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    num_bytes: u32,
    num_sectors: u32,
    pointers: Vec<u32>,
}

impl Record {
    fn encode(&self, geometry: Geometry) -> Vec<u8> {
        let mut buf = Vec::with_capacity(geometry.sector_size());
        buf.extend_from_slice(&self.num_bytes.to_le_bytes());
        buf.extend_from_slice(&self.num_sectors.to_le_bytes());
        for slot in 0..geometry.num_direct() {
            let pointer = self.pointers.get(slot).copied().unwrap_or(0);
            buf.extend_from_slice(&pointer.to_le_bytes());
        }
        buf.resize(geometry.sector_size(), 0);
        buf
    }

    fn decode(buf: &[u8], geometry: Geometry) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i * 4], buf[i * 4 + 1], buf[i * 4 + 2], buf[i * 4 + 3]]);
        Self {
            num_bytes: word(0),
            num_sectors: word(1),
            pointers: (0..geometry.num_direct()).map(|slot| word(2 + slot)).collect(),
        }
    }

    fn fetch_from<T: SectorStorage>(dev: &mut T, sector: SectorNumber) -> Result<Self, FsError> {
        let geometry = Geometry::of(dev);
        let mut buf = vec![0; geometry.sector_size()];
        dev.read_sector(sector, &mut buf)?;
        Ok(Self::decode(&buf, geometry))
    }

    fn write_back<T: SectorStorage>(&self, dev: &mut T, sector: SectorNumber) -> Result<(), FsError> {
        let geometry = Geometry::of(dev);
        dev.write_sector(sector, &self.encode(geometry))?;
        Ok(())
    }
}

/// Reads the pointer table of the index block stored at `sector`.
fn read_index<T: SectorStorage>(
    dev: &mut T,
    sector: SectorNumber,
) -> Result<Vec<SectorNumber>, FsError> {
    let record = Record::fetch_from(dev, sector)?;
    debug!("read index block {}", sector);
    Ok(record.pointers.into_iter().map(|p| p as SectorNumber).collect())
}

/// An index block built during allocation, not yet on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub sector: SectorNumber,
    pub pointers: Vec<SectorNumber>,
}

impl IndexBlock {
    fn record(&self) -> Record {
        Record {
            num_bytes: 0,
            num_sectors: self.pointers.len() as u32,
            pointers: self.pointers.iter().map(|&p| p as u32).collect(),
        }
    }
}

/// A freshly allocated header together with every index block it owns.
#[derive(Debug)]
pub struct HeaderTree {
    pub header: FileHeader,
    pub index_blocks: Vec<IndexBlock>,
}

impl HeaderTree {
    /// Writes the header to `sector`, then each index block to its own sector.
    pub fn write_back<T: SectorStorage>(&self, dev: &mut T, sector: SectorNumber) -> Result<(), FsError> {
        self.header.write_back(dev, sector)?;
        for block in &self.index_blocks {
            block.record().write_back(dev, block.sector)?;
        }
        Ok(())
    }
}

/// Every sector a header owns, in the order they hold file data.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reachable {
    pub data: Vec<SectorNumber>,
    pub index: Vec<SectorNumber>,
}

impl Reachable {
    pub fn all(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.data.iter().chain(self.index.iter()).copied()
    }
}

/// Sectors claimed from the bitmap during one allocation. Dropping it without
/// [`Reservation::commit`] hands every claimed sector back.
struct Reservation<'a> {
    bitmap: &'a mut Bitmap,
    claimed: Vec<SectorNumber>,
}

impl<'a> Reservation<'a> {
    fn new(bitmap: &'a mut Bitmap) -> Self {
        Self {
            bitmap,
            claimed: Vec::new(),
        }
    }

    fn take(&mut self) -> Result<SectorNumber, FsError> {
        let sector = self.bitmap.find().ok_or(FsError::InsufficientSpace)?;
        self.claimed.push(sector);
        Ok(sector)
    }

    fn take_n(&mut self, count: usize) -> Result<Vec<SectorNumber>, FsError> {
        (0..count).map(|_| self.take()).collect()
    }

    /// Claims an index block covering `count` data sectors and records it in `arena`.
    fn take_index(
        &mut self,
        count: usize,
        arena: &mut Vec<IndexBlock>,
    ) -> Result<SectorNumber, FsError> {
        let sector = self.take()?;
        let pointers = self.take_n(count)?;
        arena.push(IndexBlock { sector, pointers });
        Ok(sector)
    }

    fn commit(mut self) {
        self.claimed.clear();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        for &sector in self.claimed.iter().rev() {
            self.bitmap.clear(sector);
        }
        if !self.claimed.is_empty() {
            debug!("rolled back {} claimed sectors", self.claimed.len());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    num_bytes: usize,
    num_sectors: usize,
    layout: Layout,
    geometry: Geometry,
}

impl FileHeader {
    /// Reserves the full sector tree for a new file of `file_size` bytes.
    ///
    /// Either every data and index sector is marked in `bitmap` and returned, or
    /// the call fails and `bitmap` is left exactly as it was.
    pub fn allocate(
        bitmap: &mut Bitmap,
        file_size: usize,
        geometry: Geometry,
    ) -> Result<HeaderTree, FsError> {
        if file_size > geometry.max_file_size() {
            return Err(FsError::FileTooLarge);
        }
        let num_sectors = geometry.sectors_for(file_size);
        let tier = geometry.tier(num_sectors).ok_or(FsError::FileTooLarge)?;
        let required = num_sectors + geometry.index_sectors(num_sectors).unwrap_or(0);
        if bitmap.num_clear() < required {
            return Err(FsError::InsufficientSpace);
        }

        let d = geometry.num_direct();
        let mut index_blocks = Vec::new();
        let mut reservation = Reservation::new(bitmap);
        let layout = match tier {
            Tier::Direct => Layout::Direct {
                data: reservation.take_n(num_sectors)?,
            },
            Tier::SingleIndirect => {
                let direct = reservation.take_n(d - 1)?;
                let index = reservation.take_index(num_sectors - (d - 1), &mut index_blocks)?;
                Layout::SingleIndirect { direct, index }
            }
            Tier::DoubleIndirect => {
                let direct = reservation.take_n(d - 2)?;
                let single = reservation.take_index(d, &mut index_blocks)?;
                let double = reservation.take()?;
                let mut remaining = num_sectors - (2 * d - 2);
                let mut tables = Vec::new();
                while remaining > 0 {
                    let count = remaining.min(d);
                    tables.push(reservation.take_index(count, &mut index_blocks)?);
                    remaining -= count;
                }
                index_blocks.push(IndexBlock {
                    sector: double,
                    pointers: tables,
                });
                Layout::DoubleIndirect {
                    direct,
                    single,
                    double,
                }
            }
        };
        reservation.commit();

        debug!(
            "allocated {} data and {} index sectors ({:?})",
            num_sectors,
            index_blocks.len(),
            tier
        );
        Ok(HeaderTree {
            header: FileHeader {
                num_bytes: file_size,
                num_sectors,
                layout,
                geometry,
            },
            index_blocks,
        })
    }

    /// Loads the header stored at `sector`.
    pub fn fetch_from<T: SectorStorage>(dev: &mut T, sector: SectorNumber) -> Result<Self, FsError> {
        let geometry = Geometry::of(dev);
        let record = Record::fetch_from(dev, sector)?;
        let num_sectors = record.num_sectors as usize;
        let tier = match geometry.tier(num_sectors) {
            Some(tier) if geometry.sectors_for(record.num_bytes as usize) == num_sectors => tier,
            _ => {
                warn!("header at sector {} claims {} sectors", sector, num_sectors);
                return Err(FsError::Corrupt(sector));
            }
        };
        let d = geometry.num_direct();
        let p: Vec<SectorNumber> = record.pointers.iter().map(|&p| p as SectorNumber).collect();
        let layout = match tier {
            Tier::Direct => Layout::Direct {
                data: p[..num_sectors].to_vec(),
            },
            Tier::SingleIndirect => Layout::SingleIndirect {
                direct: p[..d - 1].to_vec(),
                index: p[d - 1],
            },
            Tier::DoubleIndirect => Layout::DoubleIndirect {
                direct: p[..d - 2].to_vec(),
                single: p[d - 2],
                double: p[d - 1],
            },
        };
        Ok(Self {
            num_bytes: record.num_bytes as usize,
            num_sectors,
            layout,
            geometry,
        })
    }

    pub fn write_back<T: SectorStorage>(&self, dev: &mut T, sector: SectorNumber) -> Result<(), FsError> {
        let pointers = match &self.layout {
            Layout::Direct { data } => data.clone(),
            Layout::SingleIndirect { direct, index } => {
                let mut slots = direct.clone();
                slots.push(*index);
                slots
            }
            Layout::DoubleIndirect {
                direct,
                single,
                double,
            } => {
                let mut slots = direct.clone();
                slots.push(*single);
                slots.push(*double);
                slots
            }
        };
        Record {
            num_bytes: self.num_bytes as u32,
            num_sectors: self.num_sectors as u32,
            pointers: pointers.into_iter().map(|p| p as u32).collect(),
        }
        .write_back(dev, sector)
    }

    pub fn file_length(&self) -> usize {
        self.num_bytes
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn tier(&self) -> Tier {
        match self.layout {
            Layout::Direct { .. } => Tier::Direct,
            Layout::SingleIndirect { .. } => Tier::SingleIndirect,
            Layout::DoubleIndirect { .. } => Tier::DoubleIndirect,
        }
    }

    /// Translates a byte offset within the file to the sector holding that byte.
    /// Offsets inside indirect tiers read one or two index blocks from disk.
    pub fn byte_to_sector<T: SectorStorage>(
        &self,
        dev: &mut T,
        offset: usize,
    ) -> Result<SectorNumber, FsError> {
        let index = offset / self.geometry.sector_size();
        assert!(
            index < self.num_sectors,
            "offset {} past the last sector of a {} byte file",
            offset,
            self.num_bytes
        );
        let d = self.geometry.num_direct();
        match &self.layout {
            Layout::Direct { data } => Ok(data[index]),
            Layout::SingleIndirect { direct, index: table } => {
                if index < d - 1 {
                    Ok(direct[index])
                } else {
                    Ok(read_index(dev, *table)?[index - (d - 1)])
                }
            }
            Layout::DoubleIndirect {
                direct,
                single,
                double,
            } => {
                if index < d - 2 {
                    Ok(direct[index])
                } else if index < 2 * d - 2 {
                    Ok(read_index(dev, *single)?[index - (d - 2)])
                } else {
                    let rel = index - (2 * d - 2);
                    let table = read_index(dev, *double)?[rel / d];
                    Ok(read_index(dev, table)?[rel % d])
                }
            }
        }
    }

    /// Walks the sector tree, reading index blocks back from disk.
    pub fn reachable<T: SectorStorage>(&self, dev: &mut T) -> Result<Reachable, FsError> {
        let d = self.geometry.num_direct();
        let mut reachable = Reachable::default();
        match &self.layout {
            Layout::Direct { data } => reachable.data.extend_from_slice(data),
            Layout::SingleIndirect { direct, index } => {
                reachable.data.extend_from_slice(direct);
                let pointers = read_index(dev, *index)?;
                reachable
                    .data
                    .extend_from_slice(&pointers[..self.num_sectors - (d - 1)]);
                reachable.index.push(*index);
            }
            Layout::DoubleIndirect {
                direct,
                single,
                double,
            } => {
                reachable.data.extend_from_slice(direct);
                reachable.data.extend_from_slice(&read_index(dev, *single)?);
                reachable.index.push(*single);
                reachable.index.push(*double);

                let tables = read_index(dev, *double)?;
                let mut remaining = self.num_sectors - (2 * d - 2);
                for &table in &tables {
                    if remaining == 0 {
                        break;
                    }
                    let count = remaining.min(d);
                    reachable
                        .data
                        .extend_from_slice(&read_index(dev, table)?[..count]);
                    reachable.index.push(table);
                    remaining -= count;
                }
            }
        }
        Ok(reachable)
    }

    /// Frees every data and index sector of the file. The header's own sector is
    /// left for the caller to clear.
    ///
    /// # Panics
    ///
    /// Panics if any of those sectors is not marked in `bitmap`.
    pub fn deallocate<T: SectorStorage>(&self, dev: &mut T, bitmap: &mut Bitmap) -> Result<(), FsError> {
        let reachable = self.reachable(dev)?;
        for sector in reachable.all() {
            assert!(bitmap.test(sector), "sector {} ought to be marked", sector);
            bitmap.clear(sector);
        }
        debug!(
            "freed {} data and {} index sectors",
            reachable.data.len(),
            reachable.index.len()
        );
        Ok(())
    }

    /// Dumps the header and the file contents. Printable ASCII is shown as is,
    /// everything else as a `\xx` escape.
    pub fn describe<T: SectorStorage>(&self, dev: &mut T) -> Result<String, FsError> {
        let reachable = self.reachable(dev)?;
        let mut out = String::new();
        let sectors: Vec<String> = reachable.data.iter().map(|s| s.to_string()).collect();
        let _ = writeln!(
            out,
            "FileHeader contents.  File size: {}.  File blocks:",
            self.num_bytes
        );
        let _ = writeln!(out, "{}", sectors.join(" "));
        let _ = writeln!(out, "File contents:");

        let mut buf = vec![0; self.geometry.sector_size()];
        let mut left = self.num_bytes;
        for &sector in &reachable.data {
            dev.read_sector(sector, &mut buf)?;
            for &byte in buf.iter().take(left) {
                if (0x20..=0x7e).contains(&byte) {
                    out.push(byte as char);
                } else {
                    let _ = write!(out, "\\{:x}", byte);
                }
            }
            left = left.saturating_sub(buf.len());
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{DiskEmulator, DiskEmulatorBuilder};
    use std::collections::HashSet;

    fn create_test_device(sector_size: usize, sectors: usize) -> DiskEmulator {
        let dev = tempfile::tempfile().unwrap();
        DiskEmulatorBuilder::from(dev)
            .with_sector_size(sector_size)
            .with_sectors(sectors)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    /// A bitmap with the two pinned sectors taken, plus sector 2 where the tests
    /// keep the header under examination.
    fn fresh_bitmap(sectors: usize) -> Bitmap {
        let mut bitmap = Bitmap::new(sectors);
        bitmap.mark(0);
        bitmap.mark(1);
        bitmap.mark(2);
        bitmap
    }

    #[test]
    fn geometry_matches_the_classic_layout() {
        let geometry = Geometry::new(128);
        assert_eq!(geometry.num_direct(), 30);
        assert_eq!(geometry.single_indirect_cap(), 59);
        assert_eq!(geometry.double_indirect_cap(), 958);
        assert_eq!(geometry.tier(0), Some(Tier::Direct));
        assert_eq!(geometry.tier(30), Some(Tier::Direct));
        assert_eq!(geometry.tier(31), Some(Tier::SingleIndirect));
        assert_eq!(geometry.tier(59), Some(Tier::SingleIndirect));
        assert_eq!(geometry.tier(60), Some(Tier::DoubleIndirect));
        assert_eq!(geometry.tier(958), Some(Tier::DoubleIndirect));
        assert_eq!(geometry.tier(959), None);
        assert_eq!(geometry.index_sectors(60), Some(3));
        assert_eq!(geometry.index_sectors(88), Some(3));
        assert_eq!(geometry.index_sectors(89), Some(4));
    }

    #[test]
    fn concrete_sizes_pick_the_expected_tier() {
        let mut dev = create_test_device(128, 256);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(256);

        let small = FileHeader::allocate(&mut bitmap, 3500, geometry).unwrap();
        assert_eq!(small.header.num_sectors(), 28);
        assert_eq!(small.header.tier(), Tier::Direct);
        assert!(small.index_blocks.is_empty());

        let large = FileHeader::allocate(&mut bitmap, 4000, geometry).unwrap();
        assert_eq!(large.header.num_sectors(), 32);
        assert_eq!(large.header.tier(), Tier::SingleIndirect);
        assert_eq!(large.index_blocks.len(), 1);
        assert_eq!(large.index_blocks[0].pointers.len(), 3);

        large.write_back(&mut dev, 100).unwrap();
        let loaded = FileHeader::fetch_from(&mut dev, 100).unwrap();
        assert_eq!(loaded, large.header);
    }

    #[test]
    fn tier_boundaries_use_exact_index_block_counts() {
        let sector_size = 32;
        let geometry = Geometry::new(sector_size);
        let d = geometry.num_direct();
        let cases = [
            (d, Tier::Direct, 0),
            (d + 1, Tier::SingleIndirect, 1),
            (2 * d - 1, Tier::SingleIndirect, 1),
            (2 * d, Tier::DoubleIndirect, 3),
            (3 * d - 2, Tier::DoubleIndirect, 3),
            (3 * d - 1, Tier::DoubleIndirect, 4),
            (geometry.double_indirect_cap(), Tier::DoubleIndirect, 2 + d),
        ];
        for &(sectors, tier, index_blocks) in &cases {
            let mut bitmap = fresh_bitmap(512);
            let before = bitmap.num_clear();
            let tree = FileHeader::allocate(&mut bitmap, sectors * sector_size, geometry).unwrap();
            assert_eq!(tree.header.tier(), tier, "{} sectors", sectors);
            assert_eq!(tree.index_blocks.len(), index_blocks, "{} sectors", sectors);
            assert_eq!(before - bitmap.num_clear(), sectors + index_blocks);
        }
    }

    #[test]
    fn oversized_request_fails_without_touching_the_bitmap() {
        let geometry = Geometry::new(32);
        let mut bitmap = fresh_bitmap(512);
        let before = bitmap.clone();

        let too_big = (geometry.double_indirect_cap() + 1) * 32;
        let result = FileHeader::allocate(&mut bitmap, too_big, geometry);
        assert!(matches!(result, Err(FsError::FileTooLarge)));
        // One byte past the largest file is still too large.
        let result = FileHeader::allocate(&mut bitmap, geometry.max_file_size() + 1, geometry);
        assert!(matches!(result, Err(FsError::FileTooLarge)));
        assert_eq!(bitmap, before);
    }

    #[test]
    fn sizes_near_the_top_of_usize_are_too_large() {
        let geometry = Geometry::new(128);
        let mut bitmap = fresh_bitmap(64);
        let before = bitmap.clone();

        assert_eq!(geometry.sectors_for(usize::MAX), usize::MAX / 128 + 1);
        for size in [usize::MAX, usize::MAX - 10] {
            let result = FileHeader::allocate(&mut bitmap, size, geometry);
            assert!(matches!(result, Err(FsError::FileTooLarge)));
        }
        assert_eq!(bitmap, before);
    }

    #[test]
    fn largest_file_length_fits_the_record() {
        let geometry = Geometry::new(MAX_SECTOR_SIZE);
        assert!(geometry.max_file_size() <= u32::MAX as usize);
    }

    #[test]
    #[should_panic(expected = "unsupported sector size")]
    fn oversized_sectors_are_unsupported() {
        Geometry::new(2 * MAX_SECTOR_SIZE);
    }

    #[test]
    fn garbage_header_is_reported_as_corrupt() {
        let mut dev = create_test_device(32, 16);
        dev.write_sector(5, &[0xff; 32]).unwrap();
        assert!(matches!(
            FileHeader::fetch_from(&mut dev, 5),
            Err(FsError::Corrupt(5))
        ));

        // A length that disagrees with the sector count.
        let mut record = vec![0; 32];
        record[..4].copy_from_slice(&100u32.to_le_bytes());
        record[4..8].copy_from_slice(&1u32.to_le_bytes());
        dev.write_sector(6, &record).unwrap();
        assert!(matches!(
            FileHeader::fetch_from(&mut dev, 6),
            Err(FsError::Corrupt(6))
        ));
    }

    #[test]
    fn insufficient_space_counts_index_blocks() {
        let geometry = Geometry::new(32);
        let d = geometry.num_direct();
        // Exactly enough for the data of a single indirect file, not for its index block.
        let mut bitmap = fresh_bitmap(3 + d + 1);
        let before = bitmap.num_clear();

        let result = FileHeader::allocate(&mut bitmap, (d + 1) * 32, geometry);
        assert!(matches!(result, Err(FsError::InsufficientSpace)));
        assert_eq!(bitmap.num_clear(), before);
    }

    #[test]
    fn dropping_a_partial_reservation_releases_every_claimed_sector() {
        let mut bitmap = fresh_bitmap(16);
        // 13 free sectors.
        {
            let mut reservation = Reservation::new(&mut bitmap);
            let mut arena = Vec::new();
            reservation.take_n(3).unwrap();
            reservation.take_index(4, &mut arena).unwrap();
            // Only 5 sectors remain, a second index block of 8 cannot fit.
            assert!(reservation.take_index(8, &mut arena).is_err());
        }
        assert_eq!(bitmap.num_clear(), 13);
        assert_eq!(bitmap.used().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn translation_matches_the_reachable_data_order() {
        let sector_size = 32;
        let mut dev = create_test_device(sector_size, 128);
        let geometry = Geometry::of(&dev);

        for sectors in 0..=geometry.double_indirect_cap() {
            for &slack in &[0, 5] {
                let size = (sectors * sector_size).saturating_sub(slack);
                let mut bitmap = fresh_bitmap(128);
                let tree = FileHeader::allocate(&mut bitmap, size, geometry).unwrap();
                tree.write_back(&mut dev, 2).unwrap();

                let header = FileHeader::fetch_from(&mut dev, 2).unwrap();
                assert_eq!(header.file_length(), size);
                let reachable = header.reachable(&mut dev).unwrap();
                assert_eq!(reachable.data.len(), header.num_sectors());
                for (i, &expected) in reachable.data.iter().enumerate() {
                    let offset = i * sector_size + (i % sector_size);
                    assert_eq!(header.byte_to_sector(&mut dev, offset).unwrap(), expected);
                }
            }
        }
    }

    #[test]
    fn data_written_through_translation_reads_back() {
        let sector_size = 32;
        let mut dev = create_test_device(sector_size, 128);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(128);
        let size = geometry.max_file_size() - 7;
        let tree = FileHeader::allocate(&mut bitmap, size, geometry).unwrap();
        tree.write_back(&mut dev, 2).unwrap();

        let header = FileHeader::fetch_from(&mut dev, 2).unwrap();
        for i in 0..header.num_sectors() {
            let sector = header.byte_to_sector(&mut dev, i * sector_size).unwrap();
            dev.write_sector(sector, &[i as u8; 32]).unwrap();
        }

        let reloaded = FileHeader::fetch_from(&mut dev, 2).unwrap();
        let mut buf = vec![0; sector_size];
        for i in 0..reloaded.num_sectors() {
            let sector = reloaded.byte_to_sector(&mut dev, i * sector_size + 31).unwrap();
            dev.read_sector(sector, &mut buf).unwrap();
            assert_eq!(buf, vec![i as u8; 32]);
        }
    }

    #[test]
    fn deallocation_conserves_free_sectors_for_every_size() {
        let sector_size = 32;
        let mut dev = create_test_device(sector_size, 128);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(128);

        for sectors in 0..=geometry.double_indirect_cap() {
            let before = bitmap.clone();
            let tree = FileHeader::allocate(&mut bitmap, sectors * sector_size, geometry).unwrap();
            tree.write_back(&mut dev, 2).unwrap();

            let header = FileHeader::fetch_from(&mut dev, 2).unwrap();
            header.deallocate(&mut dev, &mut bitmap).unwrap();
            assert_eq!(bitmap, before, "{} sectors", sectors);
        }
    }

    #[test]
    fn files_from_one_bitmap_never_share_sectors() {
        let sector_size = 32;
        let mut dev = create_test_device(sector_size, 256);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(256);
        bitmap.mark(3);
        bitmap.mark(4);

        let sizes = [3 * 32, 9 * 32 + 1, 40 * 32];
        let mut seen = HashSet::new();
        for (i, &size) in sizes.iter().enumerate() {
            let tree = FileHeader::allocate(&mut bitmap, size, geometry).unwrap();
            tree.write_back(&mut dev, 2 + i).unwrap();
        }
        for i in 0..sizes.len() {
            let header = FileHeader::fetch_from(&mut dev, 2 + i).unwrap();
            for sector in header.reachable(&mut dev).unwrap().all() {
                assert!(bitmap.test(sector));
                assert!(seen.insert(sector), "sector {} shared", sector);
            }
        }
    }

    #[test]
    #[should_panic(expected = "ought to be marked")]
    fn double_free_is_fatal() {
        let mut dev = create_test_device(32, 64);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(64);
        let tree = FileHeader::allocate(&mut bitmap, 100, geometry).unwrap();
        tree.write_back(&mut dev, 2).unwrap();

        tree.header.deallocate(&mut dev, &mut bitmap).unwrap();
        tree.header.deallocate(&mut dev, &mut bitmap).unwrap();
    }

    #[test]
    fn describe_escapes_unprintable_bytes() {
        let mut dev = create_test_device(32, 16);
        let geometry = Geometry::of(&dev);
        let mut bitmap = fresh_bitmap(16);
        let tree = FileHeader::allocate(&mut bitmap, 4, geometry).unwrap();
        tree.write_back(&mut dev, 2).unwrap();
        let data_sector = match tree.header.layout() {
            Layout::Direct { data } => data[0],
            other => panic!("unexpected layout {:?}", other),
        };
        dev.write_sector(data_sector, b"hi\n!").unwrap();

        let dump = tree.header.describe(&mut dev).unwrap();
        assert!(dump.contains("File size: 4."));
        assert!(dump.contains(&format!("\n{}\n", data_sector)));
        assert!(dump.contains("hi\\a!"));
    }
}

use crate::error::FsError;
use crate::io::{SectorNumber, SectorStorage};
use crate::openfile::OpenFile;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Free-space map with one bit per disk sector. A set bit means the sector is in
/// use. The map is itself persisted as an ordinary file, see
/// [`Bitmap::fetch_from`] and [`Bitmap::write_back`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    map: Vec<u64>,
    num_bits: usize,
}

impl Bitmap {
    /// Creates a map tracking `num_bits` sectors, all of them free.
    pub fn new(num_bits: usize) -> Self {
        Self {
            map: vec![0; (num_bits + 63) / 64],
            num_bits,
        }
    }

    /// Size in bytes of the persisted map.
    pub fn file_size(num_bits: usize) -> usize {
        (num_bits + 7) / 8
    }

    pub fn get(&self, sector: SectorNumber) -> State {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        // Grab the u64 containing the significant bit.
        let word = self.map[sector / 64];
        let mask = 0b01_u64 << (sector % 64);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn test(&self, sector: SectorNumber) -> bool {
        self.get(sector) == State::Used
    }

    pub fn mark(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        self.map[sector / 64] |= 0b01_u64 << (sector % 64);
    }

    pub fn clear(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        self.map[sector / 64] &= !(0b01_u64 << (sector % 64));
    }

    /// First-fit search: marks and returns the lowest numbered free sector.
    pub fn find(&mut self) -> Option<SectorNumber> {
        let (word_index, bit) = self
            .map
            .iter()
            .enumerate()
            .find_map(|(i, &bits)| (bits != u64::MAX).then(|| (i, bits.trailing_ones())))?;
        let sector = word_index * 64 + bit as usize;
        // Bits past the end of the map are never handed out.
        if sector >= self.num_bits {
            return None;
        }
        self.mark(sector);
        Some(sector)
    }

    pub fn num_clear(&self) -> usize {
        (0..self.num_bits).filter(|&s| !self.test(s)).count()
    }

    /// Every sector currently marked in use, lowest first.
    pub fn used(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        (0..self.num_bits).filter(move |&s| self.test(s))
    }

    /// Encodes the map as bytes, sector 0 in the lowest bit of the first byte.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.map.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.truncate(Self::file_size(self.num_bits));
        bytes
    }

    pub fn parse(buf: &[u8], num_bits: usize) -> Self {
        let mut bitmap = Self::new(num_bits);
        for (i, &byte) in buf.iter().take(Self::file_size(num_bits)).enumerate() {
            bitmap.map[i / 8] |= (byte as u64) << ((i % 8) * 8);
        }
        bitmap
    }

    /// Reads the map from the file that stores it.
    pub fn fetch_from<T: SectorStorage>(
        file: &OpenFile,
        dev: &mut T,
        num_bits: usize,
    ) -> Result<Self, FsError> {
        let mut buf = vec![0; Self::file_size(num_bits)];
        file.read_at(dev, &mut buf, 0)?;
        Ok(Self::parse(&buf, num_bits))
    }

    /// Flushes the map to the file that stores it.
    pub fn write_back<T: SectorStorage>(&self, file: &OpenFile, dev: &mut T) -> Result<(), FsError> {
        file.write_at(dev, &self.serialize(), 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new(128);

        bmp.mark(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new(4096);

        bmp.mark(0);
        bmp.mark(4095);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(4095), State::Used);
        assert_eq!(bmp.num_clear(), 4094);
    }

    #[test]
    fn can_toggle_sector_between_free_and_used() {
        let mut bmp = Bitmap::new(64);

        bmp.mark(10);
        bmp.mark(11);
        assert!(bmp.test(10));

        bmp.clear(10);
        assert!(!bmp.test(10));
        // Clearing one bit leaves its neighbours alone.
        assert!(bmp.test(11));
    }

    #[test]
    fn find_returns_lowest_free_sector() {
        let mut bmp = Bitmap::new(200);
        bmp.mark(0);
        bmp.mark(1);
        bmp.mark(3);

        assert_eq!(bmp.find(), Some(2));
        assert_eq!(bmp.find(), Some(4));
        bmp.clear(1);
        assert_eq!(bmp.find(), Some(1));
    }

    #[test]
    fn find_crosses_word_boundaries_and_stops_at_the_end() {
        let mut bmp = Bitmap::new(70);
        for _ in 0..70 {
            assert!(bmp.find().is_some());
        }
        assert_eq!(bmp.num_clear(), 0);
        assert_eq!(bmp.find(), None);
    }

    #[test]
    fn can_serialize_and_deserialize_state() {
        let mut bmp = Bitmap::new(1024);
        bmp.mark(10);
        bmp.mark(11);
        bmp.mark(1023);

        let encoded = bmp.serialize();
        assert_eq!(encoded.len(), 128);
        assert_eq!(encoded[1], 0b0000_1100);

        assert_eq!(Bitmap::parse(&encoded, 1024), bmp);
    }

    #[test]
    #[should_panic(expected = "outside bitmap")]
    fn marking_past_the_end_panics() {
        let mut bmp = Bitmap::new(8);
        bmp.mark(8);
    }
}

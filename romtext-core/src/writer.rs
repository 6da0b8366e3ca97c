use tracing::debug;

use crate::{Result, RomTextError};

const PAGE_SHIFT: u32 = 13;

fn page(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

/// A free range inside one page; `pos` is the first unwritten byte.
#[derive(Debug, Clone)]
struct Chunk {
    start: usize,
    end: usize,
    pos: usize,
}

impl Chunk {
    fn page(&self) -> usize {
        page(self.start)
    }

    fn free(&self) -> usize {
        self.end - self.pos
    }

    fn find(&self, data: &[u8], rom: &[u8]) -> Option<usize> {
        if data.is_empty() || self.pos - self.start < data.len() {
            return None;
        }
        rom[self.start..self.pos]
            .windows(data.len())
            .position(|w| w == data)
            .map(|p| self.start + p)
    }
}

struct PendingWrite {
    ticket: usize,
    data: Vec<u8>,
    start_page: usize,
    end_page: usize,
    label: String,
}

/// Handle for a queued write, resolved by [`Writer::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(usize);

/// Places byte blobs into registered free space of a PRG buffer.
///
/// Writes are queued and placed together on [`commit`](Writer::commit), the
/// most constrained and largest first. Data already present in a chunk is
/// reused rather than written again.
pub struct Writer<'a> {
    rom: &'a mut [u8],
    chunks: Vec<Chunk>,
    pending: Vec<PendingWrite>,
    resolved: Vec<Option<usize>>,
}

impl<'a> Writer<'a> {
    pub fn new(rom: &'a mut [u8]) -> Self {
        Self {
            rom,
            chunks: Vec::new(),
            pending: Vec::new(),
            resolved: Vec::new(),
        }
    }

    /// Registers `[start, end)` as free, split at page boundaries.
    pub fn alloc(&mut self, mut start: usize, end: usize) -> Result<()> {
        if end > self.rom.len() {
            return Err(RomTextError::OutOfBounds(end));
        }
        while start < end {
            let boundary = (page(start) + 1) << PAGE_SHIFT;
            let stop = boundary.min(end);
            self.chunks.push(Chunk {
                start,
                end: stop,
                pos: start,
            });
            start = stop;
        }
        Ok(())
    }

    /// Queues `data` for placement somewhere in the pages spanned by
    /// `[start, end)`.
    pub fn write(&mut self, data: Vec<u8>, start: usize, end: usize, label: impl Into<String>) -> Ticket {
        let ticket = self.resolved.len();
        self.resolved.push(None);
        self.pending.push(PendingWrite {
            ticket,
            data,
            start_page: page(start),
            end_page: page(end.saturating_sub(1).max(start)),
            label: label.into(),
        });
        Ticket(ticket)
    }

    /// Places every queued write. The first one that does not fit aborts
    /// the commit.
    pub fn commit(&mut self) -> Result<()> {
        let mut writes = std::mem::take(&mut self.pending);
        writes.sort_by(|a, b| {
            (a.end_page - a.start_page)
                .cmp(&(b.end_page - b.start_page))
                .then(b.data.len().cmp(&a.data.len()))
        });

        for write in writes {
            let addr = match self.find(&write) {
                Some(addr) => {
                    debug!(label = %write.label, addr = %format!("${:05x}", addr), "reused existing bytes");
                    addr
                }
                None => self.place(&write)?,
            };
            self.resolved[write.ticket] = Some(addr);
        }
        Ok(())
    }

    fn eligible(chunk: &Chunk, write: &PendingWrite) -> bool {
        (write.start_page..=write.end_page).contains(&chunk.page())
    }

    fn find(&self, write: &PendingWrite) -> Option<usize> {
        self.chunks
            .iter()
            .filter(|c| Self::eligible(c, write))
            .find_map(|c| c.find(&write.data, self.rom))
    }

    fn place(&mut self, write: &PendingWrite) -> Result<usize> {
        let len = write.data.len();
        let chunk = self
            .chunks
            .iter_mut()
            .find(|c| Self::eligible(c, write) && c.free() >= len)
            .ok_or_else(|| RomTextError::NoSpace {
                label: write.label.clone(),
                len,
                start_page: write.start_page,
                end_page: write.end_page,
            })?;
        let addr = chunk.pos;
        self.rom[addr..addr + len].copy_from_slice(&write.data);
        chunk.pos += len;
        debug!(label = %write.label, addr = %format!("${:05x}", addr), len, "placed");
        Ok(addr)
    }

    pub fn address(&self, ticket: Ticket) -> Option<usize> {
        self.resolved.get(ticket.0).copied().flatten()
    }

    /// Bytes still free across all chunks.
    pub fn free(&self) -> usize {
        self.chunks.iter().map(Chunk::free).sum()
    }

    pub fn rom(&self) -> &[u8] {
        self.rom
    }

    pub fn rom_mut(&mut self) -> &mut [u8] {
        self.rom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn places_first_fit_within_the_requested_pages() {
        let mut rom = vec![0u8; 0x6000];
        let mut writer = Writer::new(&mut rom);
        writer.alloc(0x2010, 0x2020).unwrap();
        writer.alloc(0x4000, 0x4100).unwrap();

        let a = writer.write(vec![1, 2, 3], 0x4000, 0x6000, "a");
        let b = writer.write(vec![9; 8], 0x2000, 0x4000, "b");
        assert_eq!(writer.address(a), None);
        writer.commit().unwrap();

        assert_eq!(writer.address(a), Some(0x4000));
        assert_eq!(writer.address(b), Some(0x2010));
        assert_eq!(writer.free(), 0x10 - 8 + 0x100 - 3);
        assert_eq!(&writer.rom()[0x4000..0x4003], &[1, 2, 3]);
        assert_eq!(&rom[0x2010..0x2018], &[9; 8]);
    }

    #[test]
    fn larger_writes_are_placed_first() {
        let mut rom = vec![0u8; 0x4000];
        let mut writer = Writer::new(&mut rom);
        writer.alloc(0x2000, 0x2006).unwrap();
        writer.alloc(0x2010, 0x2014).unwrap();

        let small = writer.write(vec![1, 2], 0x2000, 0x4000, "small");
        let big = writer.write(vec![7; 6], 0x2000, 0x4000, "big");
        writer.commit().unwrap();
        assert_eq!(writer.address(big), Some(0x2000));
        assert_eq!(writer.address(small), Some(0x2010));
    }

    #[test]
    fn identical_bytes_are_written_once() {
        let mut rom = vec![0u8; 0x4000];
        let mut writer = Writer::new(&mut rom);
        writer.alloc(0x2000, 0x2100).unwrap();

        let first = writer.write(vec![1, b'h', b'i', 0], 0x2000, 0x4000, "first");
        let again = writer.write(vec![1, b'h', b'i', 0], 0x2000, 0x4000, "again");
        let tail = writer.write(vec![b'i', 0], 0x2000, 0x4000, "tail");
        writer.commit().unwrap();

        assert_eq!(writer.address(first), Some(0x2000));
        assert_eq!(writer.address(again), Some(0x2000));
        assert_eq!(writer.address(tail), Some(0x2002));
        assert_eq!(writer.free(), 0x100 - 4);
    }

    #[test]
    fn free_space_never_straddles_a_page() {
        let mut rom = vec![0u8; 0x4000];
        let mut writer = Writer::new(&mut rom);
        writer.alloc(0x1ffe, 0x2002).unwrap();

        writer.write(vec![1, 2, 3], 0x0000, 0x4000, "wide");
        match writer.commit() {
            Err(RomTextError::NoSpace { label, len, start_page, end_page }) => {
                assert_eq!(label, "wide");
                assert_eq!(len, 3);
                assert_eq!((start_page, end_page), (0, 1));
            }
            other => panic!("expected NoSpace, got {:?}", other),
        }

        let t = writer.write(vec![4, 5], 0x2000, 0x4000, "fits");
        writer.commit().unwrap();
        assert_eq!(writer.address(t), Some(0x2000));
    }

    #[test]
    fn free_space_must_lie_inside_the_image() {
        let mut rom = vec![0u8; 0x100];
        let mut writer = Writer::new(&mut rom);
        assert!(matches!(writer.alloc(0x80, 0x101), Err(RomTextError::OutOfBounds(0x101))));
    }
}

//! Word-granular memory transfer.
//!
//! `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` move one machine word at a time at any
//! address. These helpers turn an arbitrary byte range into a sequence of word
//! accesses, doing read-modify-write for the partial words at either end so
//! bytes outside the range are left untouched.

use crate::debugger::check_transfer_len;
use crate::error::Result;
use crate::types::Address;

/// Size in bytes of one peek/poke transfer on x86-64
pub const WORD_SIZE: usize = 8;

/// Read `len` bytes starting at `address` using a word reader
///
/// `peek` is called with word-aligned addresses only. Lengths above
/// [`MAX_TRANSFER`](crate::debugger::MAX_TRANSFER) are rejected before any peek.
pub fn read_words<P>(address: Address, len: usize, mut peek: P) -> Result<Vec<u8>>
where
    P: FnMut(Address) -> Result<[u8; WORD_SIZE]>,
{
    check_transfer_len(len)?;
    if len == 0 {
        return Ok(Vec::new());
    }

    let lead = (address.value() % WORD_SIZE as u64) as usize;
    let aligned = address - lead as u64;
    let words = (lead + len).div_ceil(WORD_SIZE);
    let mut buffer = Vec::with_capacity(words * WORD_SIZE);

    for index in 0..words {
        let word = peek(aligned + (index * WORD_SIZE) as u64)?;
        buffer.extend_from_slice(&word);
    }

    buffer.drain(..lead);
    buffer.truncate(len);
    Ok(buffer)
}

/// Write `data` starting at `address` using a word reader and writer
///
/// Words only partially covered by `data` are read first and merged.
pub fn write_words<P, W>(address: Address, data: &[u8], mut peek: P, mut poke: W) -> Result<()>
where
    P: FnMut(Address) -> Result<[u8; WORD_SIZE]>,
    W: FnMut(Address, [u8; WORD_SIZE]) -> Result<()>,
{
    let lead = (address.value() % WORD_SIZE as u64) as usize;
    let mut word_addr = address - lead as u64;
    let mut offset = 0;
    let mut slot = lead;

    while offset < data.len() {
        let take = (WORD_SIZE - slot).min(data.len() - offset);
        let mut word = if take == WORD_SIZE {
            [0; WORD_SIZE]
        } else {
            peek(word_addr)?
        };
        word[slot..slot + take].copy_from_slice(&data[offset..offset + take]);
        poke(word_addr, word)?;

        offset += take;
        slot = 0;
        word_addr = word_addr + WORD_SIZE as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use crate::error::DebuggerError;

    use super::*;

    fn backing(start: u64, bytes: &[u8]) -> HashMap<u64, u8>
    {
        bytes.iter().enumerate().map(|(i, b)| (start + i as u64, *b)).collect()
    }

    fn peek_from(mem: &HashMap<u64, u8>, addr: Address) -> [u8; WORD_SIZE]
    {
        let mut word = [0; WORD_SIZE];
        for (i, byte) in word.iter_mut().enumerate() {
            *byte = mem.get(&(addr.value() + i as u64)).copied().unwrap_or(0);
        }
        word
    }

    #[test]
    fn test_read_words_unaligned_range()
    {
        let mem = backing(0x1000, &(0u8..32).collect::<Vec<_>>());
        let mut peeks = Vec::new();

        let bytes = read_words(Address::new(0x1003), 10, |addr| {
            peeks.push(addr.value());
            Ok(peek_from(&mem, addr))
        })
        .unwrap();

        assert_eq!(bytes, (3u8..13).collect::<Vec<_>>());
        assert_eq!(peeks, vec![0x1000, 0x1008]);
    }

    #[test]
    fn test_read_words_zero_length_does_not_peek()
    {
        let bytes = read_words(Address::new(0x1000), 0, |_| panic!("no peek expected")).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_read_words_rejects_oversized_lengths()
    {
        for len in [usize::MAX, 1usize << 44, crate::debugger::MAX_TRANSFER + 1] {
            let err = read_words(Address::new(0x1000), len, |_| panic!("no peek expected")).unwrap_err();
            assert!(matches!(err, DebuggerError::InvalidArgument(_)), "len {len}: {err}");
        }
    }

    #[test]
    fn test_write_words_single_byte_preserves_neighbours()
    {
        let mut mem = backing(0x2000, &[0x11; 16]);
        let snapshot = mem.clone();
        let mut pokes = Vec::new();

        write_words(
            Address::new(0x2005),
            &[0xCC],
            |addr| Ok(peek_from(&snapshot, addr)),
            |addr, word| {
                pokes.push(addr.value());
                for (i, byte) in word.iter().enumerate() {
                    mem.insert(addr.value() + i as u64, *byte);
                }
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(pokes, vec![0x2000]);
        assert_eq!(mem[&0x2005], 0xCC);
        assert_eq!(mem[&0x2004], 0x11);
        assert_eq!(mem[&0x2006], 0x11);
    }

    #[test]
    fn test_write_words_full_word_skips_peek()
    {
        let mut pokes = Vec::new();
        write_words(
            Address::new(0x3000),
            &42u64.to_le_bytes(),
            |_| panic!("aligned full word needs no peek"),
            |addr, word| {
                pokes.push((addr.value(), word));
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(pokes, vec![(0x3000, 42u64.to_le_bytes())]);
    }

    #[test]
    fn test_write_words_spanning_three_words()
    {
        let snapshot = backing(0x4000, &[0xFF; 24]);
        let mut written = HashMap::new();

        write_words(
            Address::new(0x4006),
            &[1; 12],
            |addr| Ok(peek_from(&snapshot, addr)),
            |addr, word| {
                written.insert(addr.value(), word);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(written.len(), 3);
        assert_eq!(written[&0x4000], [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 1, 1]);
        assert_eq!(written[&0x4008], [1; 8]);
        assert_eq!(written[&0x4010], [1, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}

//! Zero-escape codec, mapping the logical byte stream onto ring slots.
//!
//! A ring slot holding `0x00` is empty, so a zero byte can never be stored
//! literally.  The encoding is:
//!
//! | Logical stream          | Slots                |
//! |-------------------------|----------------------|
//! | run of `k` zero bytes   | `0x80, k` (1 ≤ k ≤ 255, k ≠ 0x80) |
//! | literal `0x80`          | `0x80, 0x80`         |
//! | any other byte `b`      | `b`                  |
//!
//! Runs longer than 255 bytes are split over several escape pairs.  A run
//! chunk of exactly 128 would collide with the literal `0x80` marker, so it
//! is emitted as 127 followed by a further pair.  The simplest encoder, and
//! the one the target uses one byte at a time, emits `0x80, 0x01` per zero.
//!
//! The same rules apply in both directions.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
use alloc::vec::Vec;

use crate::Result;

/// Escape introducer
pub const ESCAPE: u8 = 0x80;

/// Count byte which, following [`ESCAPE`], denotes a literal `0x80`
pub const LITERAL_ESCAPE: u8 = 0x80;

/// Longest zero run a single escape pair can carry
pub const MAX_RUN: usize = 255;

/// Encode a single logical byte.  Returns the slots and how many of them
/// are used (1 or 2).
pub const fn encode_byte(byte: u8) -> ([u8; 2], usize) {
    match byte {
        0 => ([ESCAPE, 1], 2),
        ESCAPE => ([ESCAPE, LITERAL_ESCAPE], 2),
        other => ([other, 0], 1),
    }
}

// Length of the zero run carried by the next escape pair.
fn run_chunk(run: usize) -> u8 {
    let chunk = run.min(MAX_RUN) as u8;
    if chunk == LITERAL_ESCAPE {
        chunk - 1
    } else {
        chunk
    }
}

fn zero_run(input: &[u8]) -> usize {
    input.iter().take_while(|&&b| b == 0).count()
}

/// Outcome of a bounded [`encode()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// Logical bytes taken from the input
    pub consumed: usize,
    /// Slots written to the output
    pub written: usize,
}

/// Encode as much of `input` as fits in `out`, coalescing zero runs.
///
/// An escape pair is never split across the end of `out` - encoding stops
/// early instead, and the caller continues from `consumed` once more room
/// is available.
pub fn encode(input: &[u8], out: &mut [u8]) -> Encoded {
    let mut consumed = 0;
    let mut written = 0;

    while consumed < input.len() {
        let room = out.len() - written;
        if input[consumed] == 0 {
            if room < 2 {
                break;
            }
            let chunk = run_chunk(zero_run(&input[consumed..]));
            out[written] = ESCAPE;
            out[written + 1] = chunk;
            written += 2;
            consumed += chunk as usize;
        } else {
            let (slots, len) = encode_byte(input[consumed]);
            if room < len {
                break;
            }
            out[written..written + len].copy_from_slice(&slots[..len]);
            written += len;
            consumed += 1;
        }
    }

    Encoded { consumed, written }
}

/// Number of slots [`encode()`] produces for the whole of `input`.
pub fn encoded_len(input: &[u8]) -> usize {
    let mut pos = 0;
    let mut len = 0;
    while pos < input.len() {
        if input[pos] == 0 {
            pos += run_chunk(zero_run(&input[pos..])) as usize;
            len += 2;
        } else {
            len += encode_byte(input[pos]).1;
            pos += 1;
        }
    }
    len
}

/// Encode the whole of `input` into a new vector.
#[cfg(feature = "async")]
pub fn encode_to_vec(input: &[u8]) -> Vec<u8> {
    let mut out = alloc::vec![0u8; encoded_len(input)];
    let encoded = encode(input, &mut out);
    debug_assert_eq!(encoded.consumed, input.len());
    out
}

/// Result of feeding one slot to the [`Decoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Escape introducer seen, the count slot is still to come
    Pending,
    /// A single logical byte
    Byte(u8),
    /// A run of this many zero bytes
    Zeros(u8),
}

/// Streaming decoder.
///
/// Holds on to a truncated escape pair until the count slot arrives, so a
/// reader which runs out of slots mid-pair simply polls again.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    escaped: bool,
    pending_zeros: u8,
}

impl Decoder {
    pub const fn new() -> Self {
        Self {
            escaped: false,
            pending_zeros: 0,
        }
    }

    /// Drop any partial escape pair or undelivered zeros.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Whether an escape introducer has been seen without its count.
    pub fn awaiting_count(&self) -> bool {
        self.escaped
    }

    /// Feed one slot.
    pub fn feed(&mut self, slot: u8) -> Decoded {
        if self.escaped {
            self.escaped = false;
            match slot {
                LITERAL_ESCAPE => Decoded::Byte(ESCAPE),
                count => Decoded::Zeros(count),
            }
        } else if slot == ESCAPE {
            self.escaped = true;
            Decoded::Pending
        } else {
            Decoded::Byte(slot)
        }
    }

    /// Produce the next logical byte, pulling slots from `pop` as needed.
    ///
    /// Zero runs are handed out one byte per call.  Returns `Ok(None)` once
    /// `pop` runs dry, including part way through an escape pair.
    pub fn next_byte<F>(&mut self, mut pop: F) -> Result<Option<u8>>
    where
        F: FnMut() -> Result<Option<u8>>,
    {
        if self.pending_zeros > 0 {
            self.pending_zeros -= 1;
            return Ok(Some(0));
        }

        while let Some(slot) = pop()? {
            match self.feed(slot) {
                Decoded::Pending | Decoded::Zeros(0) => continue,
                Decoded::Byte(byte) => return Ok(Some(byte)),
                Decoded::Zeros(count) => {
                    self.pending_zeros = count - 1;
                    return Ok(Some(0));
                }
            }
        }
        Ok(None)
    }

    /// Decode a block of slots, appending the logical bytes to `out`.
    #[cfg(feature = "async")]
    pub fn decode_into(&mut self, slots: &[u8], out: &mut Vec<u8>) {
        for &slot in slots {
            match self.feed(slot) {
                Decoded::Pending => {}
                Decoded::Byte(byte) => out.push(byte),
                Decoded::Zeros(count) => out.resize(out.len() + count as usize, 0),
            }
        }
    }
}

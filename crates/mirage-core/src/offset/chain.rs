//! Ordered pointer-resolution recipes
//!
//! A [`PointerChain`] starts at some address (a signature match, the anchor
//! root, an entity) and applies each step in turn. Every read goes through
//! [`ReadMemory`], so a bad intermediate pointer fails the chain instead of
//! faulting.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::{Address, ReadMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResolveStep {
    /// Move the cursor by a fixed distance
    Skip { bytes: i64 },
    /// Follow an x64 RIP-relative 32-bit displacement.
    ///
    /// The displacement is read at `cursor + disp_offset` and is relative to
    /// `cursor + instr_len` (defaults to the end of the displacement).
    Rel32 {
        disp_offset: i64,
        #[serde(default)]
        instr_len: Option<i64>,
    },
    /// Replace the cursor with the pointer stored at `cursor + at`
    Deref {
        #[serde(default)]
        at: i64,
    },
    /// Add a constant to the cursor
    Add { value: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointerChain(pub Vec<ResolveStep>);

impl PointerChain {
    pub fn new(steps: Vec<ResolveStep>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[ResolveStep] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply every step starting from `start`. The final address must be plausible.
    pub fn resolve<R: ReadMemory + ?Sized>(&self, reader: &R, start: Address) -> Result<Address> {
        let mut cursor = start;
        for (i, step) in self.0.iter().enumerate() {
            cursor = apply_step(reader, cursor, *step).map_err(|e| {
                Error::AnchorResolveFailed(format!("step {} ({:?}) at {}: {}", i, step, cursor, e))
            })?;
        }

        if !reader.is_plausible(cursor) {
            return Err(Error::AnchorResolveFailed(format!(
                "chain ended at implausible address {}",
                cursor
            )));
        }
        Ok(cursor)
    }
}

fn apply_step<R: ReadMemory + ?Sized>(reader: &R, cursor: Address, step: ResolveStep) -> Result<Address> {
    match step {
        ResolveStep::Skip { bytes } => Ok(cursor.offset(bytes)),
        ResolveStep::Add { value } => Ok(cursor.offset(value)),
        ResolveStep::Rel32 {
            disp_offset,
            instr_len,
        } => {
            let instr_len = match instr_len {
                Some(len) => len,
                None => disp_offset.checked_add(4).ok_or_else(|| {
                    Error::InvalidLayout(format!("rel32 disp_offset {} overflows", disp_offset))
                })?,
            };
            let disp = reader.read_i32(cursor.offset(disp_offset))?;
            Ok(cursor.offset(instr_len).offset(disp as i64))
        }
        ResolveStep::Deref { at } => reader.read_address(cursor.offset(at)),
    }
}

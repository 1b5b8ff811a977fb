//! Checksum recomputation, run after the modification pipeline (and only if
//! it actually changed something — see the silent-no-op resolution in
//! DESIGN.md for a checksum enabled against an empty program).

use crate::error::{GatewayError, Result};
use crate::frame::CanFrame;

/// Sentinel value for `from_idx` that marks a checksum spec inactive.
pub const DISABLED: i8 = 42;

/// Resolve a signed index in `[-8, 7]` to an absolute byte offset: `i` as-is
/// when non-negative, `dlc + i` when negative (`-1` is "last byte", `-8` is
/// "first byte"). Always clamped into `0..=7` so callers can never read or
/// write outside the 8-byte payload, even for a DLC/index combination the
/// install-time validation didn't anticipate.
fn resolve_index(i: i8, dlc: u8) -> usize {
    let resolved = if i >= 0 {
        i as i32
    } else {
        dlc as i32 + i as i32
    };
    resolved.clamp(0, 7) as usize
}

fn ordered_bounds(from: i8, to: i8, dlc: u8) -> (usize, usize) {
    let a = resolve_index(from, dlc);
    let b = resolve_index(to, dlc);
    (a.min(b), a.max(b))
}

/// Validate that `from`/`to`/`result` all lie in `[-8, 7]`. Applied at
/// install time (`GatewayControl::create`) to every *enabled* checksum spec,
/// regardless of whether the job's modification program is empty.
pub fn check_checksum_params(from: i8, to: i8, result: i8) -> Result<()> {
    for (name, v) in [("from_idx", from), ("to_idx", to), ("result_idx", result)] {
        if !(-8..=7).contains(&v) {
            return Err(GatewayError::invalid(format!(
                "checksum {name} out of range: {v}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorChecksum {
    pub from_idx: i8,
    pub to_idx: i8,
    pub result_idx: i8,
    pub init_xor: u8,
}

impl XorChecksum {
    pub fn is_enabled(&self) -> bool {
        self.from_idx != DISABLED
    }

    pub fn apply(&self, frame: &mut CanFrame) {
        if !self.is_enabled() {
            return;
        }
        let (lo, hi) = ordered_bounds(self.from_idx, self.to_idx, frame.dlc);
        let acc = frame.data[lo..=hi]
            .iter()
            .fold(self.init_xor, |acc, b| acc ^ b);
        let out = resolve_index(self.result_idx, frame.dlc);
        frame.data[out] = acc;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crc8Profile {
    Unspec,
    XorValue(u8),
    XorDlc,
}

/// CRC-8 over `data[lo..=hi]`, table-driven, with an optional profile
/// extension XOR'd into the running CRC before the table walk begins.
#[derive(Clone, Copy)]
pub struct Crc8Checksum {
    pub from_idx: i8,
    pub to_idx: i8,
    pub result_idx: i8,
    pub profile: Crc8Profile,
    pub init_crc: u8,
    pub table: [u8; 256],
}

impl std::fmt::Debug for Crc8Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc8Checksum")
            .field("from_idx", &self.from_idx)
            .field("to_idx", &self.to_idx)
            .field("result_idx", &self.result_idx)
            .field("profile", &self.profile)
            .field("init_crc", &self.init_crc)
            .field("table", &"[u8; 256]")
            .finish()
    }
}

impl PartialEq for Crc8Checksum {
    fn eq(&self, other: &Self) -> bool {
        self.from_idx == other.from_idx
            && self.to_idx == other.to_idx
            && self.result_idx == other.result_idx
            && self.profile == other.profile
            && self.init_crc == other.init_crc
            && self.table[..] == other.table[..]
    }
}
impl Eq for Crc8Checksum {}

impl Crc8Checksum {
    pub fn is_enabled(&self) -> bool {
        self.from_idx != DISABLED
    }

    pub fn apply(&self, frame: &mut CanFrame) {
        if !self.is_enabled() {
            return;
        }
        let (lo, hi) = ordered_bounds(self.from_idx, self.to_idx, frame.dlc);
        let mut crc = self.init_crc;
        match self.profile {
            Crc8Profile::Unspec => {}
            Crc8Profile::XorValue(v) => crc ^= v,
            Crc8Profile::XorDlc => crc ^= frame.dlc,
        }
        for &b in &frame.data[lo..=hi] {
            crc = self.table[(crc ^ b) as usize];
        }
        let out = resolve_index(self.result_idx, frame.dlc);
        frame.data[out] = crc;
    }
}

/// Build the standard CRC-8/SAE-J1850 table (polynomial 0x1D), used by the
/// simulated backend and tests as a representative `crctab`.
pub const fn build_sae_j1850_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x1D;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

//! Random set prefixes.
//!
//! A prefix names both the on-disk set file and the base of every member's
//! remote transaction name, so it must not collide with any live set or any
//! leftover file in the set directory. Pid-plus-counter schemes get reused on
//! busy hosts, where the directory may still hold a set from an earlier
//! process with the same pid; 122 random bits do not.

use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::error::{Result, XactError};

/// Generate a fresh prefix from the OS entropy source, stamped as a
/// version-4, variant-1 identifier. Rendered as five hyphenated lowercase
/// hex groups, 8-4-4-4-12.
pub fn generate_prefix() -> Result<String> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes).map_err(|err| {
        XactError::Internal(format!("could not generate random values: {err}"))
    })?;
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Ok(Uuid::from_bytes(bytes).hyphenated().to_string())
}

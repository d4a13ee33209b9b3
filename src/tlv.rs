// Copyright 2023 Gravitational, Inc
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BER-TLV length handling.
//!
//! Constructed templates (SELECT response, dynamic authentication templates)
//! go through `iso7816_tlv`; this module covers the places where the wire
//! format is not library-friendly: walking raw length octets inside the
//! session buffer, and the GET DATA response, which always carries the
//! three-octet `82 hh ll` length form regardless of the value size.

use crate::errors::{invalid_data_error, PivResult};

/// Parses the BER-TLV length octets at the start of `raw`.
///
/// Returns `(value_length, header_size)` where `header_size` is the number of
/// length octets consumed. Supported forms are a single octet below `0x80`,
/// `81 nn` and `82 hh ll`; anything longer has no business in a 2000-byte
/// session buffer and is rejected as malformed.
pub fn length_of(raw: &[u8]) -> PivResult<(usize, usize)> {
    match raw.first() {
        None => Err(invalid_data_error("truncated TLV length")),
        Some(&n) if n < 0x80 => Ok((n as usize, 1)),
        Some(0x81) => {
            if raw.len() < 2 {
                return Err(invalid_data_error("truncated TLV length"));
            }
            Ok((raw[1] as usize, 2))
        }
        Some(0x82) => {
            if raw.len() < 3 {
                return Err(invalid_data_error("truncated TLV length"));
            }
            Ok((((raw[1] as usize) << 8) | raw[2] as usize, 3))
        }
        Some(&n) => Err(invalid_data_error(&format!(
            "unsupported TLV length form {:#04X}",
            n
        ))),
    }
}

/// Appends `len` in the shortest BER-TLV length form.
pub fn write_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        write_len_long(out, len);
    }
}

/// Appends `len` in the forced three-octet `82 hh ll` form.
pub fn write_len_long(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= 0xFFFF);
    out.push(0x82);
    out.push((len >> 8) as u8);
    out.push(len as u8);
}

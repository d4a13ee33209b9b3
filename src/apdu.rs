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

//! ISO 7816-4 APDU wire types.

use crate::errors::{invalid_data_error, PivResult};
use byteorder::{BigEndian, ByteOrder};
use iso7816::response::Status;

/// Command chaining bit in CLA: set on every segment but the last.
pub const CLA_CHAINING: u8 = 0x10;

/// A command APDU, as delivered by the reader.
#[derive(Debug, Clone)]
pub struct Capdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length. A wire LE of `00` (short) or `0000`
    /// (extended) decodes to 256 / 65536 per the standard; an absent LE
    /// behaves as 256, so a case-3 command can still collect a short
    /// response.
    pub le: usize,
}

impl Capdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>, le: usize) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        }
    }

    pub fn is_chaining(&self) -> bool {
        self.cla & CLA_CHAINING != 0
    }

    /// Decodes a raw APDU, covering short and extended cases 1 through 4.
    pub fn decode(raw: &[u8]) -> PivResult<Self> {
        if raw.len() < 4 {
            return Err(invalid_data_error("APDU shorter than its header"));
        }
        let (cla, ins, p1, p2) = (raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];

        let (data, le) = match body.len() {
            // Case 1: no data, no LE.
            0 => (vec![], LE_ABSENT),
            // Case 2 short: a lone LE byte, 00 meaning 256.
            1 => (vec![], le_short(body[0])),
            n if body[0] == 0x00 => {
                // Extended forms open with a zero octet.
                if n == 3 {
                    // Case 2 extended: 00 LE1 LE2, 0000 meaning 65536.
                    (vec![], le_extended(BigEndian::read_u16(&body[1..3])))
                } else if n < 3 {
                    return Err(invalid_data_error("malformed extended APDU"));
                } else {
                    let lc = BigEndian::read_u16(&body[1..3]) as usize;
                    if n == 3 + lc {
                        // Case 3 extended.
                        (body[3..].to_vec(), LE_ABSENT)
                    } else if n == 3 + lc + 2 {
                        // Case 4 extended.
                        let le = le_extended(BigEndian::read_u16(&body[3 + lc..]));
                        (body[3..3 + lc].to_vec(), le)
                    } else {
                        return Err(invalid_data_error("extended LC disagrees with APDU size"));
                    }
                }
            }
            n => {
                let lc = body[0] as usize;
                if n == 1 + lc {
                    // Case 3 short.
                    (body[1..].to_vec(), LE_ABSENT)
                } else if n == 2 + lc {
                    // Case 4 short.
                    (body[1..1 + lc].to_vec(), le_short(body[1 + lc]))
                } else {
                    return Err(invalid_data_error("LC disagrees with APDU size"));
                }
            }
        };

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        })
    }
}

// Absent LE still allows one full short response, matching card firmware
// behavior for case-1 and case-3 commands that produce data.
const LE_ABSENT: usize = 256;

fn le_short(le: u8) -> usize {
    if le == 0 {
        256
    } else {
        le as usize
    }
}

fn le_extended(le: u16) -> usize {
    if le == 0 {
        65536
    } else {
        le as usize
    }
}

/// A response APDU: optional data followed by the two status word bytes.
#[derive(Debug)]
pub struct Response {
    data: Option<Vec<u8>>,
    status: Status,
}

impl Response {
    pub(crate) fn new(status: Status) -> Self {
        Self { data: None, status }
    }

    pub(crate) fn with_data(status: Status, data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            status,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// The status word as it appears on the wire.
    pub fn sw(&self) -> u16 {
        let sw: [u8; 2] = self.status.into();
        BigEndian::read_u16(&sw)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(data) = &self.data {
            buf.extend_from_slice(data);
        }
        let status: [u8; 2] = self.status.into();
        buf.extend_from_slice(&status);
        buf
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::new();
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_case_1() {
        let c = Capdu::decode(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!((c.cla, c.ins, c.p1, c.p2), (0x00, 0xA4, 0x04, 0x00));
        assert!(c.data.is_empty());
        assert_eq!(c.le, 256);
    }

    #[test]
    fn decode_case_2() {
        let c = Capdu::decode(&[0x00, 0xC0, 0x00, 0x00, 0xFF]).unwrap();
        assert_eq!(c.le, 255);
        let c = Capdu::decode(&[0x00, 0xC0, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(c.le, 256);
    }

    #[test]
    fn decode_case_3() {
        let c = Capdu::decode(&[0x00, 0x20, 0x00, 0x80, 0x02, 0x31, 0x32]).unwrap();
        assert_eq!(c.data, vec![0x31, 0x32]);
        assert_eq!(c.le, 256);
    }

    #[test]
    fn decode_case_4() {
        let c = Capdu::decode(&[0x00, 0x87, 0x00, 0x9B, 0x02, 0x7C, 0x00, 0x00]).unwrap();
        assert_eq!(c.data, vec![0x7C, 0x00]);
        assert_eq!(c.le, 256);
    }

    #[test]
    fn decode_extended_lc() {
        let mut raw = vec![0x00, 0xDB, 0x3F, 0xFF, 0x00, 0x01, 0x04];
        raw.extend_from_slice(&[0xAA; 0x104]);
        let c = Capdu::decode(&raw).unwrap();
        assert_eq!(c.data.len(), 0x104);
        assert_eq!(c.le, 256);

        raw.extend_from_slice(&[0x00, 0x00]);
        let c = Capdu::decode(&raw).unwrap();
        assert_eq!(c.data.len(), 0x104);
        assert_eq!(c.le, 65536);
    }

    #[test]
    fn decode_rejects_inconsistent_lc() {
        assert!(Capdu::decode(&[0x00, 0x20, 0x00, 0x80, 0x05, 0x31, 0x32]).is_err());
        assert!(Capdu::decode(&[0x00]).is_err());
    }

    #[test]
    fn chaining_bit() {
        let c = Capdu::new(0x10, 0xDB, 0x3F, 0xFF, vec![], 0);
        assert!(c.is_chaining());
        let c = Capdu::new(0x00, 0xDB, 0x3F, 0xFF, vec![], 0);
        assert!(!c.is_chaining());
    }

    #[test]
    fn response_encoding() {
        let r = Response::with_data(Status::Success, vec![0x01, 0x02]);
        assert_eq!(r.encode(), vec![0x01, 0x02, 0x90, 0x00]);
        assert_eq!(r.sw(), 0x9000);

        let r = Response::new(Status::MoreAvailable(0x08));
        assert_eq!(r.encode(), vec![0x61, 0x08]);
    }
}

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

use bitflags::bitflags;
use iso7816::aid::Aid;
use num_derive::{FromPrimitive, ToPrimitive};

// AID (Application ID) of the PIV application, per
// https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf
pub const PIV_AID: Aid = Aid::new_truncatable(
    &[
        0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00,
    ],
    5, // usually truncates to first 5 bytes
);

pub const RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x08];
pub const PIX: [u8; 6] = [0x00, 0x00, 0x10, 0x00, 0x01, 0x00];

// The session buffer bounds both assembled chained commands and pending long
// responses.
pub const MAX_BUFFER_SIZE: usize = 2000;

#[derive(Debug, FromPrimitive, ToPrimitive, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    Verify = 0x20,
    ChangeReferenceData = 0x24,
    ResetRetryCounter = 0x2C,
    GenerateAsymmetricKeyPair = 0x47,
    GeneralAuthenticate = 0x87,
    Select = 0xA4,
    GetResponse = 0xC0,
    GetData = 0xCB,
    PutData = 0xDB,
}

// Algorithm identifiers, per
// https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-78-4.pdf
#[derive(Debug, FromPrimitive, ToPrimitive, Copy, Clone, PartialEq, Eq)]
pub enum Alg {
    /// Alias for 3DES in GENERAL AUTHENTICATE P1.
    Default = 0x00,
    TripleDes = 0x03,
    Rsa2048 = 0x07,
    Aes128 = 0x08,
    Ecc256 = 0x11,
}

impl Alg {
    /// Size of one challenge/response unit for this algorithm: the cipher
    /// block for the symmetric algorithms, the modulus for RSA. None for
    /// algorithms GENERAL AUTHENTICATE cannot serve.
    pub fn block_size(self) -> Option<usize> {
        match self {
            Alg::Default | Alg::TripleDes => Some(8),
            Alg::Aes128 => Some(16),
            Alg::Rsa2048 => Some(256),
            Alg::Ecc256 => None,
        }
    }
}

/// Key reference bytes (P2 of GENERAL AUTHENTICATE), each naming one key
/// object in the store.
#[derive(Debug, FromPrimitive, ToPrimitive, Copy, Clone, PartialEq, Eq)]
pub enum KeySlot {
    PivAuth = 0x9A,
    CardAdmin = 0x9B,
    Signature = 0x9C,
    KeyManagement = 0x9D,
    CardAuth = 0x9E,
}

impl KeySlot {
    pub fn path(self) -> &'static str {
        match self {
            KeySlot::PivAuth => PIV_AUTH_KEY_PATH,
            KeySlot::CardAdmin => CARD_ADMIN_KEY_PATH,
            KeySlot::Signature => SIG_KEY_PATH,
            KeySlot::KeyManagement => KEY_MANAGEMENT_KEY_PATH,
            KeySlot::CardAuth => CARD_AUTH_KEY_PATH,
        }
    }
}

// Data object paths.
pub const PIV_AUTH_CERT_PATH: &str = "piv-pauc";
pub const SIG_CERT_PATH: &str = "piv-sigc";
pub const KEY_MANAGEMENT_CERT_PATH: &str = "piv-mntc";
pub const CARD_AUTH_CERT_PATH: &str = "piv-cauc";
pub const CHUID_PATH: &str = "piv-chu";
pub const CCC_PATH: &str = "piv-ccc";

// Key paths.
pub const PIV_AUTH_KEY_PATH: &str = "piv-pauk";
pub const SIG_KEY_PATH: &str = "piv-sigk";
pub const KEY_MANAGEMENT_KEY_PATH: &str = "piv-mntk";
pub const CARD_AUTH_KEY_PATH: &str = "piv-cauk";
pub const CARD_ADMIN_KEY_PATH: &str = "piv-admk";

// PIN paths.
pub const PIN_PATH: &str = "piv-pin";
pub const PUK_PATH: &str = "piv-puk";

/// Attribute tag under which every key object stores its algorithm id.
pub const TAG_KEY_ALG: u8 = 0x00;

// PIN reference bytes (P2 of the PIN-related instructions).
pub const PIN_REFERENCE: u8 = 0x80;
pub const PUK_REFERENCE: u8 = 0x81;

// Data object tags, the `xx` of a `5F C1 xx` tag list.
pub fn object_path_by_tag(tag: u8) -> Option<&'static str> {
    match tag {
        0x01 => Some(CARD_AUTH_CERT_PATH), // X.509 Certificate for Card Authentication
        0x02 => Some(CHUID_PATH),          // Card Holder Unique Identifier
        0x05 => Some(PIV_AUTH_CERT_PATH),  // X.509 Certificate for PIV Authentication
        0x07 => Some(CCC_PATH),            // Card Capability Container
        0x0A => Some(SIG_CERT_PATH),       // X.509 Certificate for Digital Signature
        0x0B => Some(KEY_MANAGEMENT_CERT_PATH), // X.509 Certificate for Key Management
        _ => None,
    }
}

// SELECT response tags.
pub const TLV_TAG_APPLICATION_PROPERTY_TEMPLATE: u8 = 0x61;
pub const TLV_TAG_AID: u8 = 0x4F;
pub const TLV_TAG_COEXISTENT_TAG_ALLOCATION_AUTHORITY: u8 = 0x79;
// GET DATA / PUT DATA tags.
pub const TLV_TAG_TAG_LIST: u8 = 0x5C;
pub const TLV_TAG_DISCOVERY_OBJECT: u8 = 0x7E;
pub const TLV_TAG_PIN_USAGE_POLICY: u16 = 0x5F2F;
// GENERAL AUTHENTICATE tags.
pub const TLV_TAG_DYNAMIC_AUTHENTICATION_TEMPLATE: u8 = 0x7C;
pub const TLV_TAG_WITNESS: u8 = 0x80;
pub const TLV_TAG_CHALLENGE: u8 = 0x81;
pub const TLV_TAG_RESPONSE: u8 = 0x82;
pub const TLV_TAG_EXPONENTIATION: u8 = 0x85;
// CHUID and certificate object tags.
pub const TLV_TAG_DATA_FIELD: u8 = 0x53;
pub const TLV_TAG_FASC_N: u8 = 0x30;
pub const TLV_TAG_GUID: u8 = 0x34;
pub const TLV_TAG_EXPIRATION_DATE: u8 = 0x35;
pub const TLV_TAG_ISSUER_ASYMMETRIC_SIGNATURE: u8 = 0x3E;
pub const TLV_TAG_ERROR_DETECTION_CODE: u8 = 0xFE;
pub const TLV_TAG_CERTIFICATE: u8 = 0x70;
pub const TLV_TAG_CERTINFO: u8 = 0x71;

bitflags! {
    /// First octet of the Discovery Object's PIN usage policy.
    #[derive(Debug, PartialEq, Clone, Copy)]
    pub struct PinPolicy: u8 {
        const PIV_PIN = 0x40;
        const GLOBAL_PIN = 0x20;
        const OCC = 0x10;
        const VCI = 0x08;
    }
}

/// Second octet of the PIN usage policy: the PIV PIN is the primary
/// verification method.
pub const PIN_POLICY_PRIMARY_PIV_PIN: u8 = 0x10;

pub fn pin_usage_policy() -> [u8; 2] {
    [PinPolicy::PIV_PIN.bits(), PIN_POLICY_PRIMARY_PIV_PIN]
}

// Install-time defaults, per the standard's factory values.
pub const DEFAULT_PIN: &[u8; 8] = b"123456\xFF\xFF";
pub const DEFAULT_PUK: &[u8; 8] = b"12345678";
pub const DEFAULT_RETRY_LIMIT: u8 = 3;
pub const DEFAULT_ADMIN_KEY: [u8; 24] = [
    1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8,
];

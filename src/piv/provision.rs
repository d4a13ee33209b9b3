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

//! Factory state and personalization helpers.
//!
//! `install` writes the card's fabrication defaults. The `build_*` helpers
//! produce the standard object bodies a personalization tool would PUT DATA
//! onto the card afterwards.

use crate::crypto::CryptoBackend;
use crate::errors::PivResult;
use crate::piv::consts::*;
use crate::piv::PivApplication;
use crate::store::ObjectStore;
use crate::tlv;
use uuid::Uuid;

impl<S: ObjectStore, C: CryptoBackend> PivApplication<S, C> {
    /// Writes the factory state: default PIN and PUK, empty data objects,
    /// empty keys, and the well-known default admin key. Runs once during
    /// card fabrication.
    pub fn install(&mut self) -> PivResult<()> {
        // PIN data.
        self.pin
            .create(&mut self.store, DEFAULT_PIN, DEFAULT_RETRY_LIMIT)?;
        self.puk
            .create(&mut self.store, DEFAULT_PUK, DEFAULT_RETRY_LIMIT)?;

        // Data objects start out empty; GET DATA reports them as not found
        // until personalization fills them in.
        for path in [
            PIV_AUTH_CERT_PATH,
            SIG_CERT_PATH,
            KEY_MANAGEMENT_CERT_PATH,
            CARD_AUTH_CERT_PATH,
            CCC_PATH,
            CHUID_PATH,
        ] {
            self.store.write_file(path, &[])?;
        }

        // Keys: present but unprovisioned, algorithm unset.
        for slot in [
            KeySlot::PivAuth,
            KeySlot::Signature,
            KeySlot::KeyManagement,
            KeySlot::CardAuth,
            KeySlot::CardAdmin,
        ] {
            self.store.write_file(slot.path(), &[])?;
            self.store.write_attr(slot.path(), TAG_KEY_ALG, &[0xFF])?;
        }

        // Except the card admin key, which ships with the well-known 3DES
        // default so the issuer can run the first personalization.
        self.store.write_file(CARD_ADMIN_KEY_PATH, &DEFAULT_ADMIN_KEY)?;
        self.store
            .write_attr(CARD_ADMIN_KEY_PATH, TAG_KEY_ALG, &[Alg::TripleDes as u8])?;

        Ok(())
    }
}

/// Builds a CHUID object body for the given cardholder UUID.
///
/// This is gross: the CHUID is a BER-TLV value with nested SIMPLE-TLV
/// values, which none of the TLV libraries out there support, so it is
/// constructed by hand from raw bytes.
/// https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf
/// table 9 has the explanation of fields.
pub fn build_chuid(uuid: Uuid) -> Vec<u8> {
    // Top-level BER-TLV tag and length.
    let mut chuid = vec![TLV_TAG_DATA_FIELD, 0x3B];
    // TLV tag and length for FASC-N.
    chuid.extend_from_slice(&[TLV_TAG_FASC_N, 0x19]);
    // FASC-N value containing S9999F9999F999999F0F1F0000000000300001E, with a
    // weird encoding from section 6 of:
    // https://www.idmanagement.gov/docs/pacs-tig-scepacs.pdf
    chuid.extend_from_slice(&[
        0xd4, 0xe7, 0x39, 0xda, 0x73, 0x9c, 0xed, 0x39, 0xce, 0x73, 0x9d, 0x83, 0x68, 0x58, 0x21,
        0x08, 0x42, 0x10, 0x84, 0x21, 0xc8, 0x42, 0x10, 0xc3, 0xeb,
    ]);
    // TLV for the cardholder UUID.
    chuid.extend_from_slice(&[TLV_TAG_GUID, 0x10]);
    chuid.extend_from_slice(uuid.as_bytes());
    // TLV for expiration date (YYYYMMDD).
    chuid.extend_from_slice(&[TLV_TAG_EXPIRATION_DATE, 0x08]);
    chuid.extend_from_slice("20300101".as_bytes());
    // TLV for the issuer signature (empty).
    chuid.extend_from_slice(&[TLV_TAG_ISSUER_ASYMMETRIC_SIGNATURE, 0x00]);
    // TLV for the error detection code (empty).
    chuid.extend_from_slice(&[TLV_TAG_ERROR_DETECTION_CODE, 0x00]);
    chuid
}

/// Wraps a DER certificate in the standard certificate object body
/// (certificate, CertInfo, error detection code). Same caveat as
/// [`build_chuid`]: the nested tags are not BER-compatible, so the value is
/// marshaled by hand.
pub fn build_cert_object(cert_der: &[u8]) -> Vec<u8> {
    let mut inner = vec![TLV_TAG_CERTIFICATE];
    tlv::write_len(&mut inner, cert_der.len());
    inner.extend_from_slice(cert_der);
    // CertInfo (0x00 indicates an uncompressed certificate).
    inner.extend_from_slice(&[TLV_TAG_CERTINFO, 0x01, 0x00]);
    inner.extend_from_slice(&[TLV_TAG_ERROR_DETECTION_CODE, 0x00]);

    // Wrap with the top-level tag and length.
    let mut body = vec![TLV_TAG_DATA_FIELD];
    tlv::write_len(&mut body, inner.len());
    body.extend_from_slice(&inner);
    body
}

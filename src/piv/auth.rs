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

//! GENERAL AUTHENTICATE, SP 800-73-4 section 3.2.4 and Part 2 Appendix A.
//!
//! One instruction multiplexes internal, external and mutual authentication;
//! the presence and emptiness of the dynamic authentication template's
//! children select the case. External authentication spans two commands, so
//! the expected response lives in a volatile [`AuthContext`] between them.

use crate::apdu::Capdu;
use crate::crypto::CryptoBackend;
use crate::errors::PivResult;
use crate::piv::consts::*;
use crate::piv::{tlv, PivApplication, Reply};
use crate::store::ObjectStore;
use iso7816::response::Status;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use num_traits::FromPrimitive;
use std::convert::{TryFrom, TryInto};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Room for the largest expected response we remember between the two
/// external-auth commands (one AES block).
const CHALLENGE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    None,
    External,
    // Reserved for the mutual-authenticate witness exchange.
    #[allow(dead_code)]
    Mutual,
}

/// Volatile cross-command authentication state. Armed by an external-auth
/// challenge request, consumed (and cleared) by the response; cleared on
/// select, reset and every protocol violation.
#[derive(Debug)]
pub(crate) struct AuthContext {
    state: AuthState,
    key_id: u8,
    algo: u8,
    challenge: [u8; CHALLENGE_CAPACITY],
}

impl Default for AuthContext {
    fn default() -> Self {
        Self {
            state: AuthState::None,
            key_id: 0,
            algo: 0,
            challenge: [0; CHALLENGE_CAPACITY],
        }
    }
}

impl AuthContext {
    pub(crate) fn reset(&mut self) {
        self.state = AuthState::None;
        self.key_id = 0;
        self.algo = 0;
        self.challenge.zeroize();
    }

    fn arm_external(&mut self, key_id: u8, algo: Alg, expected: &[u8]) {
        self.state = AuthState::External;
        self.key_id = key_id;
        self.algo = algo as u8;
        self.challenge = [0; CHALLENGE_CAPACITY];
        self.challenge[..expected.len()].copy_from_slice(expected);
    }
}

/// The children of a `7C` dynamic authentication template, indexed by tag.
/// An empty vector means the child was present with zero length, which is
/// how the host asks the card to fill that slot in.
#[derive(Debug, Default)]
struct AuthTemplate {
    witness: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
    response: Option<Vec<u8>>,
    #[allow(dead_code)]
    exponentiation: Option<Vec<u8>>,
}

impl AuthTemplate {
    fn parse(data: &[u8]) -> Option<Self> {
        let request = Tlv::from_bytes(data).ok()?;
        if *request.tag() != Tag::try_from(TLV_TAG_DYNAMIC_AUTHENTICATION_TEMPLATE).ok()? {
            return None;
        }
        let children = match request.value() {
            Value::Constructed(children) => children,
            Value::Primitive(_) => return None,
        };
        let mut template = AuthTemplate::default();
        for child in children {
            let body = match child.value() {
                Value::Primitive(body) => body.clone(),
                Value::Constructed(_) => return None,
            };
            if *child.tag() == Tag::try_from(TLV_TAG_WITNESS).ok()? {
                template.witness = Some(body);
            } else if *child.tag() == Tag::try_from(TLV_TAG_CHALLENGE).ok()? {
                template.challenge = Some(body);
            } else if *child.tag() == Tag::try_from(TLV_TAG_RESPONSE).ok()? {
                template.response = Some(body);
            } else if *child.tag() == Tag::try_from(TLV_TAG_EXPONENTIATION).ok()? {
                template.exponentiation = Some(body);
            } else {
                return None;
            }
        }
        Some(template)
    }
}

fn filled(child: &Option<Vec<u8>>) -> bool {
    matches!(child, Some(body) if !body.is_empty())
}

fn empty(child: &Option<Vec<u8>>) -> bool {
    matches!(child, Some(body) if body.is_empty())
}

impl<S: ObjectStore, C: CryptoBackend> PivApplication<S, C> {
    pub(super) fn handle_general_authenticate(
        &mut self,
        capdu: &Capdu,
        data: &[u8],
    ) -> PivResult<Reply> {
        if data.first() != Some(&TLV_TAG_DYNAMIC_AUTHENTICATION_TEMPLATE) {
            return Ok(Reply::Status(Status::IncorrectDataParameter));
        }
        let slot = match KeySlot::from_u8(capdu.p2) {
            Some(slot) => slot,
            None => return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter)),
        };

        // The stored algorithm of the slot must agree with P1 before any key
        // material is touched. P1=00 is accepted as an alias for 3DES.
        let alg_attr = self.store.read_attr(slot.path(), TAG_KEY_ALG)?;
        let stored = alg_attr.first().copied().and_then(Alg::from_u8);
        let requested = Alg::from_u8(capdu.p1);
        let alg = match (stored, requested) {
            (Some(stored), Some(requested))
                if stored == requested
                    || (requested == Alg::Default && stored == Alg::TripleDes) =>
            {
                stored
            }
            _ => {
                debug!(
                    "P1 {:#04X}, P2 {:#04X}, stored alg {:?}",
                    capdu.p1, capdu.p2, stored
                );
                return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
            }
        };
        let block = match alg.block_size() {
            Some(block) => block,
            None => return Ok(Reply::Status(Status::SecurityStatusNotSatisfied)),
        };

        let template = match AuthTemplate::parse(data) {
            Some(template) => template,
            None => {
                self.auth_ctx.reset();
                return Ok(Reply::Status(Status::IncorrectDataParameter));
            }
        };

        //
        // CASE 1 - INTERNAL AUTHENTICATE
        // Authenticates the CARD to the CLIENT and is also used for KEY
        // ESTABLISHMENT and DIGITAL SIGNATURES. The client sends a challenge
        // and the card answers with the key's primitive applied to it.
        //
        if filled(&template.challenge) && empty(&template.response) {
            let challenge = template.challenge.unwrap_or_default();
            self.internal_authenticate(slot, alg, block, &challenge)
        }
        //
        // CASE 2 - EXTERNAL AUTHENTICATE REQUEST
        // Authenticates the HOST to the CARD: the client asks for a fresh
        // challenge.
        //
        else if empty(&template.challenge) {
            self.external_authenticate_challenge(slot, alg, block)
        }
        //
        // CASE 3 - EXTERNAL AUTHENTICATE RESPONSE
        // The client returns the challenge encrypted under the shared admin
        // key.
        //
        else if filled(&template.response) {
            let response = template.response.unwrap_or_default();
            self.external_authenticate_response(slot, alg, block, &response)
        }
        //
        // CASES 4 and 5 - MUTUAL AUTHENTICATE (witness exchange) are
        // reserved, and everything else is a protocol violation; both drop
        // any authentication in progress.
        //
        else {
            self.auth_ctx.reset();
            Ok(Reply::Status(Status::IncorrectDataParameter))
        }
    }

    fn internal_authenticate(
        &mut self,
        slot: KeySlot,
        alg: Alg,
        block: usize,
        challenge: &[u8],
    ) -> PivResult<Reply> {
        self.auth_ctx.reset();
        if slot != KeySlot::PivAuth && slot != KeySlot::CardAuth {
            return Ok(Reply::Status(Status::SecurityStatusNotSatisfied));
        }
        if challenge.len() != block {
            return Ok(Reply::Status(Status::IncorrectDataParameter));
        }
        let key = self.store.read_file(slot.path())?;

        let result = match alg {
            Alg::Rsa2048 => self.crypto.rsa_private(&key, challenge)?,
            Alg::Default | Alg::TripleDes => self
                .crypto
                .tdes_enc(&key, &to_block(challenge)?)?
                .to_vec(),
            Alg::Aes128 => self.crypto.aes_enc(&key, &to_block(challenge)?)?.to_vec(),
            Alg::Ecc256 => return Ok(Reply::Status(Status::SecurityStatusNotSatisfied)),
        };

        let resp = tlv(
            TLV_TAG_DYNAMIC_AUTHENTICATION_TEMPLATE,
            Value::Constructed(vec![tlv(TLV_TAG_RESPONSE, Value::Primitive(result))?]),
        )?;
        Ok(Reply::Data(resp.to_vec()))
    }

    fn external_authenticate_challenge(
        &mut self,
        slot: KeySlot,
        alg: Alg,
        block: usize,
    ) -> PivResult<Reply> {
        self.auth_ctx.reset();
        if slot != KeySlot::CardAdmin {
            return Ok(Reply::Status(Status::SecurityStatusNotSatisfied));
        }
        let key = self.store.read_file(slot.path())?;

        let mut fresh = vec![0u8; block];
        self.crypto.rand_fill(&mut fresh)?;
        let expected: Vec<u8> = match alg {
            Alg::Default | Alg::TripleDes => self.crypto.tdes_enc(&key, &to_block(&fresh)?)?.to_vec(),
            Alg::Aes128 => self.crypto.aes_enc(&key, &to_block(&fresh)?)?.to_vec(),
            _ => return Ok(Reply::Status(Status::SecurityStatusNotSatisfied)),
        };
        // Only arm the context once the expected response is in hand.
        self.auth_ctx.arm_external(slot as u8, alg, &expected);

        let resp = tlv(
            TLV_TAG_DYNAMIC_AUTHENTICATION_TEMPLATE,
            Value::Constructed(vec![tlv(TLV_TAG_CHALLENGE, Value::Primitive(fresh))?]),
        )?;
        Ok(Reply::Data(resp.to_vec()))
    }

    fn external_authenticate_response(
        &mut self,
        slot: KeySlot,
        alg: Alg,
        block: usize,
        response: &[u8],
    ) -> PivResult<Reply> {
        let armed = self.auth_ctx.state == AuthState::External
            && self.auth_ctx.key_id == slot as u8
            && self.auth_ctx.algo == alg as u8
            && response.len() == block;
        // The byte comparison must not short-circuit on the first mismatch.
        let matched = armed && bool::from(self.auth_ctx.challenge[..block].ct_eq(response));
        self.auth_ctx.reset();

        if matched {
            self.admin_authenticated = true;
            Ok(Reply::ok())
        } else {
            Ok(Reply::Status(Status::SecurityStatusNotSatisfied))
        }
    }
}

fn to_block<const N: usize>(bytes: &[u8]) -> PivResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| crate::errors::invalid_data_error("challenge is not one cipher block"))
}

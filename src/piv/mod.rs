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

//! The PIV card application: command dispatch, APDU chaining and long
//! responses, data objects and PIN handling. The GENERAL AUTHENTICATE state
//! machine lives in [`auth`], fabrication defaults in [`provision`].

mod auth;
pub mod consts;
mod provision;

use crate::apdu::{to_hex, Capdu, Response};
use crate::crypto::CryptoBackend;
use crate::errors::{invalid_data_error, PivResult};
use crate::pin::{Pin, PinOutcome};
use crate::store::ObjectStore;
use crate::tlv;
use auth::AuthContext;
use consts::*;
use iso7816::response::Status;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use num_traits::FromPrimitive;
use std::cmp::min;
use std::convert::TryFrom;

pub use consts::{Alg, Instruction, KeySlot};
pub use provision::{build_cert_object, build_chuid};

/// What a command handler produced: either a bare status word, or response
/// bytes to be staged in the session buffer and drained through the
/// long-response mechanism.
pub(crate) enum Reply {
    Status(Status),
    Data(Vec<u8>),
}

impl Reply {
    fn ok() -> Self {
        Reply::Status(Status::Success)
    }
}

/// Which role the session buffer is currently playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Buffer is free.
    Normal,
    /// Buffer is accumulating command data chained under the remembered
    /// header; a segment with a different header aborts the chain.
    Chaining { ins: u8, p1: u8, p2: u8 },
    /// Buffer holds a pending response being drained by GET RESPONSE.
    LongResponse,
}

/// The single buffer shared by command assembly and response emission.
#[derive(Debug, Default)]
struct SessionBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl SessionBuffer {
    fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Appends command data, refusing to grow past the buffer capacity.
    fn append(&mut self, bytes: &[u8]) -> bool {
        if self.data.len() + bytes.len() > MAX_BUFFER_SIZE {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Takes the assembled command out, leaving the buffer free for the
    /// response.
    fn take(&mut self) -> Vec<u8> {
        self.pos = 0;
        std::mem::take(&mut self.data)
    }

    fn stage(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
        self.pos = 0;
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn emit(&mut self, le: usize) -> Vec<u8> {
        let n = min(le, self.remaining());
        let chunk = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        chunk
    }
}

/// Card-side PIV application. One value holds the entire session: the shared
/// buffer, chaining state, PIN validation, the authentication context and the
/// admin flag. `process` runs each command to completion; there is no other
/// entry point and no global state.
pub struct PivApplication<S, C> {
    store: S,
    crypto: C,
    buffer: SessionBuffer,
    state: SessionState,
    pin: Pin,
    puk: Pin,
    auth_ctx: AuthContext,
    admin_authenticated: bool,
}

impl<S: ObjectStore, C: CryptoBackend> PivApplication<S, C> {
    pub fn new(store: S, crypto: C) -> Self {
        Self {
            store,
            crypto,
            buffer: SessionBuffer::default(),
            state: SessionState::Normal,
            pin: Pin::new(PIN_PATH, 8, 8),
            puk: Pin::new(PUK_PATH, 8, 8),
            auth_ctx: AuthContext::default(),
            admin_authenticated: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access, for provisioning flows that bypass the APDU
    /// surface (the admin application shares the filesystem on a real card).
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// True after a successful external authenticate against the card admin
    /// key, until the next reset.
    pub fn admin_authenticated(&self) -> bool {
        self.admin_authenticated
    }

    /// Transport reset or deselect: abandon any chained command or pending
    /// response and drop all authentication state.
    pub fn reset(&mut self) {
        self.state = SessionState::Normal;
        self.buffer.clear();
        self.reset_security_state();
    }

    fn reset_security_state(&mut self) {
        self.pin.clear_validation();
        self.puk.clear_validation();
        self.auth_ctx.reset();
        self.admin_authenticated = false;
    }

    /// Processes one command APDU to completion.
    ///
    /// Internal failures (store or crypto back-end) never escape: they map to
    /// SW `6F00` with no response data.
    pub fn process(&mut self, capdu: &Capdu) -> Response {
        debug!("got command: {:?}", capdu);
        let resp = match self.process_inner(capdu) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("unable to process command: {}", e);
                Response::new(Status::UnspecifiedCheckingError)
            }
        };
        debug!("send response: {}", to_hex(&resp.encode()));
        resp
    }

    fn process_inner(&mut self, capdu: &Capdu) -> PivResult<Response> {
        loop {
            match self.state {
                SessionState::Normal => {
                    self.buffer.clear();
                    if capdu.is_chaining() {
                        self.state = SessionState::Chaining {
                            ins: capdu.ins,
                            p1: capdu.p1,
                            p2: capdu.p2,
                        };
                        continue;
                    }
                    if !self.buffer.append(&capdu.data) {
                        self.buffer.clear();
                        return Ok(Response::new(Status::IncorrectDataParameter));
                    }
                    break;
                }
                SessionState::Chaining { ins, p1, p2 } => {
                    if (ins, p1, p2) != (capdu.ins, capdu.p1, capdu.p2) {
                        // A different command aborts the chain and starts
                        // over as a fresh command.
                        self.state = SessionState::Normal;
                        continue;
                    }
                    if !self.buffer.append(&capdu.data) {
                        self.state = SessionState::Normal;
                        self.buffer.clear();
                        return Ok(Response::new(Status::IncorrectDataParameter));
                    }
                    if capdu.is_chaining() {
                        // More segments to come.
                        return Ok(Response::new(Status::Success));
                    }
                    self.state = SessionState::Normal;
                    break;
                }
                SessionState::LongResponse => {
                    if capdu.ins != Instruction::GetResponse as u8 {
                        // Any other command abandons the pending response.
                        self.state = SessionState::Normal;
                        continue;
                    }
                    break;
                }
            }
        }
        self.dispatch(capdu)
    }

    fn dispatch(&mut self, capdu: &Capdu) -> PivResult<Response> {
        let ins = match Instruction::from_u8(capdu.ins) {
            Some(ins) => ins,
            None => {
                warn!("unsupported instruction {:#04X}", capdu.ins);
                self.buffer.clear();
                return Ok(Response::new(Status::InstructionNotSupportedOrInvalid));
            }
        };

        // GET RESPONSE drains the pending response in place; every other
        // instruction consumes the assembled command, freeing the buffer for
        // its own response.
        if ins == Instruction::GetResponse {
            if self.state != SessionState::LongResponse {
                return Ok(Response::new(Status::ConditionsOfUseNotSatisfied));
            }
            return Ok(self.send_staged(capdu.le));
        }
        let data = self.buffer.take();

        let reply = match ins {
            Instruction::Select => self.handle_select(capdu, &data)?,
            Instruction::GetData => self.handle_get_data(capdu, &data)?,
            Instruction::Verify => self.handle_verify(capdu, &data)?,
            Instruction::ChangeReferenceData => self.handle_change_reference_data(capdu, &data)?,
            Instruction::ResetRetryCounter => self.handle_reset_retry_counter(capdu, &data)?,
            Instruction::GeneralAuthenticate => self.handle_general_authenticate(capdu, &data)?,
            Instruction::PutData => self.handle_put_data(capdu, &data)?,
            // Key generation belongs to the provisioning tooling; accepted
            // and ignored, as in previous firmware revisions.
            Instruction::GenerateAsymmetricKeyPair => Reply::ok(),
            Instruction::GetResponse => Reply::Status(Status::ConditionsOfUseNotSatisfied),
        };

        Ok(match reply {
            Reply::Status(status) => Response::new(status),
            Reply::Data(bytes) => {
                self.buffer.stage(bytes);
                self.send_staged(capdu.le)
            }
        })
    }

    /// Emits up to LE bytes of the staged response. When bytes remain the
    /// session switches to `LongResponse` and reports the pending count,
    /// capped at `0xFF`.
    fn send_staged(&mut self, le: usize) -> Response {
        let chunk = self.buffer.emit(le);
        let remaining = self.buffer.remaining();
        if remaining > 0 {
            self.state = SessionState::LongResponse;
            Response::with_data(Status::MoreAvailable(min(remaining, 0xFF) as u8), chunk)
        } else {
            self.state = SessionState::Normal;
            self.buffer.clear();
            Response::with_data(Status::Success, chunk)
        }
    }

    fn handle_select(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        // P1=04, P2=00: selection of the application by name. Nothing else is
        // supported.
        if capdu.p1 != 0x04 || capdu.p2 != 0x00 {
            return Ok(Reply::Status(Status::NotFound));
        }
        if !data.is_empty() && !PIV_AID.matches(data) {
            return Ok(Reply::Status(Status::NotFound));
        }

        // Selecting the application always starts from a clean slate.
        self.reset_security_state();

        // See https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf
        // section 3.1.1
        let resp = tlv(
            TLV_TAG_APPLICATION_PROPERTY_TEMPLATE,
            Value::Constructed(vec![
                tlv(TLV_TAG_AID, Value::Primitive(PIX.to_vec()))?,
                tlv(
                    TLV_TAG_COEXISTENT_TAG_ALLOCATION_AUTHORITY,
                    Value::Constructed(vec![tlv(TLV_TAG_AID, Value::Primitive(RID.to_vec()))?]),
                )?,
            ]),
        )?;
        Ok(Reply::Data(resp.to_vec()))
    }

    /// GET DATA, SP 800-73-4 section 3.1.2. The command data is a `5C` tag
    /// list naming either the Discovery Object (`7E`) or a `5F C1 xx` data
    /// object.
    fn handle_get_data(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        if capdu.p1 != 0x3F || capdu.p2 != 0xFF {
            return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
        }
        if data.first() != Some(&TLV_TAG_TAG_LIST) {
            return Ok(Reply::Status(Status::IncorrectDataParameter));
        }
        let (tag_len, hdr) = match tlv::length_of(&data[1..]) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(Reply::Status(Status::IncorrectDataParameter)),
        };
        if 1 + hdr + tag_len != data.len() {
            return Ok(Reply::Status(Status::WrongLength));
        }
        match &data[1 + hdr..] {
            [0x7E] => self.discovery_object(),
            [0x5F, 0xC1, tag] => self.data_object(*tag),
            _ => Ok(Reply::Status(Status::NotFound)),
        }
    }

    // The Discovery Object template nests two data elements: tag 0x4F
    // carries the AID of the PIV Card Application and tag 0x5F2F the PIN
    // Usage Policy.
    fn discovery_object(&self) -> PivResult<Reply> {
        let mut aid = RID.to_vec();
        aid.extend_from_slice(&PIX);
        let resp = tlv(
            TLV_TAG_DISCOVERY_OBJECT,
            Value::Constructed(vec![
                tlv(TLV_TAG_AID, Value::Primitive(aid))?,
                tlv16(
                    TLV_TAG_PIN_USAGE_POLICY,
                    Value::Primitive(pin_usage_policy().to_vec()),
                )?,
            ]),
        )?;
        Ok(Reply::Data(resp.to_vec()))
    }

    fn data_object(&self, tag: u8) -> PivResult<Reply> {
        let path = match object_path_by_tag(tag) {
            Some(path) => path,
            None => return Ok(Reply::Status(Status::NotFound)),
        };
        let body = self.store.read_file(path)?;
        if body.is_empty() {
            return Ok(Reply::Status(Status::NotFound));
        }
        // This response always carries the three-octet length form.
        let mut resp = vec![TLV_TAG_TAG_LIST];
        tlv::write_len_long(&mut resp, body.len());
        resp.extend_from_slice(&body);
        Ok(Reply::Data(resp))
    }

    fn handle_verify(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        if capdu.p1 != 0x00 && capdu.p1 != 0xFF {
            return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
        }
        if capdu.p2 != PIN_REFERENCE {
            return Ok(Reply::Status(Status::KeyReferenceNotFound));
        }
        if capdu.p1 == 0xFF {
            // Explicit reset of the verification state.
            if !data.is_empty() {
                return Ok(Reply::Status(Status::WrongLength));
            }
            self.pin.clear_validation();
            return Ok(Reply::ok());
        }
        if data.is_empty() {
            // Status probe: report success or the retries left.
            if self.pin.is_validated() {
                return Ok(Reply::ok());
            }
            let retries = self.pin.retries(&self.store)?;
            return Ok(Reply::Status(Status::RemainingRetries(retries)));
        }
        if data.len() != 8 {
            return Ok(Reply::Status(Status::WrongLength));
        }
        let (outcome, retries) = self.pin.verify(&mut self.store, data)?;
        Ok(Reply::Status(pin_status(outcome, retries)))
    }

    /// CHANGE REFERENCE DATA: the current PIN in the first 8 bytes authorizes
    /// the new PIN in the last 8.
    fn handle_change_reference_data(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        if capdu.p1 != 0x00 {
            return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
        }
        if capdu.p2 != PIN_REFERENCE {
            return Ok(Reply::Status(Status::KeyReferenceNotFound));
        }
        if data.len() != 16 {
            return Ok(Reply::Status(Status::WrongLength));
        }
        let (outcome, retries) = self.pin.verify(&mut self.store, &data[..8])?;
        if outcome != PinOutcome::Ok || retries == 0 {
            return Ok(Reply::Status(pin_status(outcome, retries)));
        }
        match self.pin.update(&mut self.store, &data[8..])? {
            PinOutcome::LengthInvalid => Ok(Reply::Status(Status::WrongLength)),
            _ => Ok(Reply::ok()),
        }
    }

    /// RESET RETRY COUNTER: the PUK in the first 8 bytes authorizes writing
    /// the reference selected by P2 with the last 8.
    fn handle_reset_retry_counter(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        if capdu.p1 != 0x00 {
            return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
        }
        if capdu.p2 != PIN_REFERENCE && capdu.p2 != PUK_REFERENCE {
            return Ok(Reply::Status(Status::KeyReferenceNotFound));
        }
        if data.len() != 16 {
            return Ok(Reply::Status(Status::WrongLength));
        }
        let (outcome, retries) = self.puk.verify(&mut self.store, &data[..8])?;
        if outcome != PinOutcome::Ok || retries == 0 {
            return Ok(Reply::Status(pin_status(outcome, retries)));
        }
        let target = if capdu.p2 == PIN_REFERENCE {
            &mut self.pin
        } else {
            &mut self.puk
        };
        match target.update(&mut self.store, &data[8..])? {
            PinOutcome::LengthInvalid => Ok(Reply::Status(Status::WrongLength)),
            _ => Ok(Reply::ok()),
        }
    }

    /// PUT DATA overwrites the object named by the `5F C1 xx` tag list with
    /// everything that follows it. Gated on management-key authentication.
    fn handle_put_data(&mut self, capdu: &Capdu, data: &[u8]) -> PivResult<Reply> {
        if capdu.p1 != 0x3F || capdu.p2 != 0xFF {
            return Ok(Reply::Status(Status::IncorrectP1OrP2Parameter));
        }
        if !self.admin_authenticated {
            return Ok(Reply::Status(Status::SecurityStatusNotSatisfied));
        }
        if data.first() != Some(&TLV_TAG_TAG_LIST) {
            return Ok(Reply::Status(Status::IncorrectDataParameter));
        }
        if data.len() < 5 || data[1] != 0x03 || data[2] != 0x5F || data[3] != 0xC1 {
            return Ok(Reply::Status(Status::NotFound));
        }
        let path = match object_path_by_tag(data[4]) {
            Some(path) => path,
            None => return Ok(Reply::Status(Status::NotFound)),
        };
        self.store.write_file(path, &data[5..])?;
        Ok(Reply::ok())
    }
}

fn pin_status(outcome: PinOutcome, retries: u8) -> Status {
    if retries == 0 {
        return Status::OperationBlocked;
    }
    match outcome {
        PinOutcome::Ok => Status::Success,
        PinOutcome::AuthFail => Status::RemainingRetries(retries),
        PinOutcome::LengthInvalid => Status::WrongLength,
    }
}

pub(crate) fn tlv(tag: u8, value: Value) -> PivResult<Tlv> {
    Tlv::new(tlv_tag(tag)?, value)
        .map_err(|e| invalid_data_error(&format!("TLV with tag {:#X} invalid: {:?}", tag, e)))
}

pub(crate) fn tlv16(tag: u16, value: Value) -> PivResult<Tlv> {
    let tag = Tag::try_from(tag)
        .map_err(|e| invalid_data_error(&format!("TLV tag {:#X} invalid: {:?}", tag, e)))?;
    Tlv::new(tag, value)
        .map_err(|e| invalid_data_error(&format!("TLV invalid: {:?}", e)))
}

pub(crate) fn tlv_tag(val: u8) -> PivResult<Tag> {
    Tag::try_from(val)
        .map_err(|e| invalid_data_error(&format!("TLV tag {:#X} invalid: {:?}", val, e)))
}

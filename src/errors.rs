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

use thiserror::Error;

/// Internal failures of the application core. These are distinct from
/// protocol-level outcomes (which are status words on the response): a
/// `PivError` reaching the dispatcher always surfaces as SW `6F00` with no
/// response data.
#[derive(Debug, Error)]
pub enum PivError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

pub type PivResult<T> = Result<T, PivError>;

// Helper function to return an unmarshaling error.
pub fn invalid_data_error(msg: &str) -> PivError {
    PivError::InvalidData(msg.to_string())
}

pub fn storage_error(msg: &str) -> PivError {
    PivError::Storage(msg.to_string())
}

pub fn crypto_error(msg: &str) -> PivError {
    PivError::Crypto(msg.to_string())
}

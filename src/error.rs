//! Crate-level convenience error.
//!
//! A thin wrapper over the canonical layer errors, not a god error. The
//! exit-code mapping lives here: domain/refusal states are configuration
//! errors (2), everything operational is 1.

use thiserror::Error;

use crate::core::CoreError;
use crate::service::OpError;
use crate::store::StoreError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Op(#[from] OpError),
}

impl Error {
    /// CLI exit code: 2 for configuration/bootstrap/validation failures,
    /// 1 for operational errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Core(_) => 2,
            Error::Store(_) | Error::Op(_) => 1,
        }
    }
}

//! Shared error taxonomy.
//!
//! Every failure is classified into one of four kinds: validation errors are
//! returned to the caller unchanged, transient errors are retried by the
//! caller, operational errors surface as a folder notification, and fatal
//! errors terminate the process. `Error` is the common currency crates
//! convert into at their public boundary; internal modules are free to
//! define narrower `thiserror` enums and map them in with `#[from]`.

use thiserror::Error;

/// Classification used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Bad input, surfaced to the caller as-is. Never retried.
  Validation,
  /// Expected to succeed on retry (I/O race, worker crash, busy backend).
  Transient,
  /// Surfaced as a folder notification; folder enters `error` after the
  /// configured consecutive-failure threshold is exhausted.
  Operational,
  /// Unrecoverable; the process should exit.
  Fatal,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("Validation: {0}")]
  Validation(String),

  #[error("Transient: {0}")]
  Transient(String),

  #[error("Operational: {0}")]
  Operational(String),

  #[error("Fatal: {0}")]
  Fatal(String),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  pub fn class(&self) -> ErrorClass {
    match self {
      Error::Validation(_) => ErrorClass::Validation,
      Error::Transient(_) => ErrorClass::Transient,
      Error::Operational(_) => ErrorClass::Operational,
      Error::Fatal(_) => ErrorClass::Fatal,
      Error::NotFound { .. } => ErrorClass::Validation,
      Error::Io(_) => ErrorClass::Transient,
      Error::Json(_) => ErrorClass::Operational,
    }
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Error::Validation(msg.into())
  }

  pub fn transient(msg: impl Into<String>) -> Self {
    Error::Transient(msg.into())
  }

  pub fn operational(msg: impl Into<String>) -> Self {
    Error::Operational(msg.into())
  }

  pub fn fatal(msg: impl Into<String>) -> Self {
    Error::Fatal(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_variants() {
    assert_eq!(Error::validation("x").class(), ErrorClass::Validation);
    assert_eq!(Error::transient("x").class(), ErrorClass::Transient);
    assert_eq!(Error::operational("x").class(), ErrorClass::Operational);
    assert_eq!(Error::fatal("x").class(), ErrorClass::Fatal);
    assert_eq!(
      Error::NotFound {
        entity: "folder",
        id: "x".into()
      }
      .class(),
      ErrorClass::Validation
    );
  }
}

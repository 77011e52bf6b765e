//! Purpose: Shared error model for the registry, lock table, lifecycle, and ABI layers.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: One builder-style error carried through every fallible operation.
//! Invariants: Kind codes are stable; the CLI exit codes and C ABI codes share them.
//! Invariants: Contract violations are classified by kind, never by message text.
use std::error::Error as StdError;
use std::fmt;

use crate::core::caller::CallerId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Allocation,
    AlreadyAttached,
    NotAttached,
    OutOfRange,
    NotHeld,
    Reentrant,
    State,
    Platform,
    Io,
}

impl ErrorKind {
    /// Programming errors on the caller's side rather than runtime conditions.
    pub fn is_contract_violation(self) -> bool {
        matches!(
            self,
            ErrorKind::AlreadyAttached
                | ErrorKind::NotAttached
                | ErrorKind::OutOfRange
                | ErrorKind::NotHeld
                | ErrorKind::Reentrant
        )
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    caller: Option<CallerId>,
    resource: Option<usize>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            caller: None,
            resource: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn caller(&self) -> Option<CallerId> {
        self.caller
    }

    pub fn resource(&self) -> Option<usize> {
        self.resource
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_caller(mut self, caller: CallerId) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_resource(mut self, resource: usize) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(caller) = self.caller {
            write!(f, " (caller: {caller})")?;
        }
        if let Some(resource) = self.resource {
            write!(f, " (resource: {resource})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Allocation => 3,
        ErrorKind::AlreadyAttached => 4,
        ErrorKind::NotAttached => 5,
        ErrorKind::OutOfRange => 6,
        ErrorKind::NotHeld => 7,
        ErrorKind::Reentrant => 8,
        ErrorKind::State => 9,
        ErrorKind::Platform => 10,
        ErrorKind::Io => 11,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use crate::core::caller::CallerId;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Allocation, 3),
            (ErrorKind::AlreadyAttached, 4),
            (ErrorKind::NotAttached, 5),
            (ErrorKind::OutOfRange, 6),
            (ErrorKind::NotHeld, 7),
            (ErrorKind::Reentrant, 8),
            (ErrorKind::State, 9),
            (ErrorKind::Platform, 10),
            (ErrorKind::Io, 11),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn contract_violations_are_classified_by_kind() {
        assert!(ErrorKind::NotAttached.is_contract_violation());
        assert!(ErrorKind::OutOfRange.is_contract_violation());
        assert!(!ErrorKind::Allocation.is_contract_violation());
        assert!(!ErrorKind::State.is_contract_violation());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::OutOfRange)
            .with_message("resource id out of range")
            .with_caller(CallerId::from_raw(7))
            .with_resource(99);
        let text = err.to_string();
        assert!(text.starts_with("OutOfRange: resource id out of range"));
        assert!(text.contains("(caller: 7)"));
        assert!(text.contains("(resource: 99)"));
    }
}

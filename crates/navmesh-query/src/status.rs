//! Composable status codes for navigation queries
//!
//! Every query reports a [`Status`] made of one high level flag (success,
//! failure or in progress) plus any number of detail flags. Detail flags
//! combine freely, e.g. a path can be partial and truncated at once.

use std::fmt;

bitflags::bitflags! {
    /// Status bits returned by navigation queries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        /// Operation failed
        const FAILURE = 1 << 31;
        /// Operation succeeded
        const SUCCESS = 1 << 30;
        /// Operation still in progress
        const IN_PROGRESS = 1 << 29;

        /// Input data is not recognized
        const WRONG_MAGIC = 1 << 0;
        /// Input data is in wrong version
        const WRONG_VERSION = 1 << 1;
        /// Operation ran out of memory
        const OUT_OF_MEMORY = 1 << 2;
        /// An input parameter was invalid
        const INVALID_PARAM = 1 << 3;
        /// Result buffer for the query was too small to store all results
        const BUFFER_TOO_SMALL = 1 << 4;
        /// Query ran out of nodes during search
        const OUT_OF_NODES = 1 << 5;
        /// Query did not reach the end location, returning best guess
        const PARTIAL_RESULT = 1 << 6;
        /// A tile has already been assigned to the given x,y coordinate
        const ALREADY_OCCUPIED = 1 << 7;
    }
}

impl Status {
    /// Mask of the detail bits.
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;

    /// Failure with the given detail bits.
    pub fn failure(detail: Status) -> Self {
        Status::FAILURE | detail.detail()
    }

    /// Failure caused by an invalid input parameter.
    pub fn invalid_param() -> Self {
        Status::FAILURE | Status::INVALID_PARAM
    }

    /// Returns true if the success bit is set.
    pub fn is_success(&self) -> bool {
        self.contains(Status::SUCCESS)
    }

    /// Returns true if the failure bit is set.
    pub fn is_failure(&self) -> bool {
        self.contains(Status::FAILURE)
    }

    /// Returns true if the in-progress bit is set.
    pub fn is_in_progress(&self) -> bool {
        self.contains(Status::IN_PROGRESS)
    }

    /// Returns true if the specific detail bit(s) are set.
    pub fn has_detail(&self, detail: Status) -> bool {
        self.intersects(detail.detail())
    }

    /// Returns only the detail bits.
    pub fn detail(&self) -> Status {
        Status::from_bits_truncate(self.bits() & Self::DETAIL_MASK)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_failure() {
            "failure"
        } else if self.is_in_progress() {
            "in progress"
        } else if self.is_success() {
            "success"
        } else {
            "unknown"
        };
        write!(f, "{state}")?;

        let details = [
            (Status::WRONG_MAGIC, "wrong magic"),
            (Status::WRONG_VERSION, "wrong version"),
            (Status::OUT_OF_MEMORY, "out of memory"),
            (Status::INVALID_PARAM, "invalid parameter"),
            (Status::BUFFER_TOO_SMALL, "buffer too small"),
            (Status::OUT_OF_NODES, "out of nodes"),
            (Status::PARTIAL_RESULT, "partial result"),
            (Status::ALREADY_OCCUPIED, "already occupied"),
        ];
        let mut first = true;
        for (flag, name) in details {
            if self.contains(flag) {
                write!(f, "{}{name}", if first { " (" } else { ", " })?;
                first = false;
            }
        }
        if !first {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<Status> for navmesh_common::Error {
    fn from(status: Status) -> Self {
        navmesh_common::Error::Query(status.to_string())
    }
}

/// Result type for queries. `Err` always carries [`Status::FAILURE`].
pub type QueryResult<T> = std::result::Result<T, Status>;

/// A query payload together with the status it finished with
///
/// The status always has [`Status::SUCCESS`] set (or [`Status::IN_PROGRESS`]
/// for sliced searches) and may carry detail bits such as
/// [`Status::PARTIAL_RESULT`] or [`Status::BUFFER_TOO_SMALL`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome<T> {
    /// Query result
    pub value: T,
    /// Status bits describing the result
    pub status: Status,
}

impl<T> Outcome<T> {
    /// Wraps a value with its status.
    pub fn new(value: T, status: Status) -> Self {
        Self { value, status }
    }

    /// Wraps a value with a plain success status.
    pub fn success(value: T) -> Self {
        Self::new(value, Status::SUCCESS)
    }

    /// True if the search did not reach its goal.
    pub fn is_partial(&self) -> bool {
        self.status.contains(Status::PARTIAL_RESULT)
    }

    /// Maps the payload, keeping the status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome::new(f(self.value), self.status)
    }
}

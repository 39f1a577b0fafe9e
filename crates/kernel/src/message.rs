//! Messages exchanged between tasks.
//!
//! A message carries a numeric type tag, the address of its sender, the
//! address of its recipient and an optional opaque payload. Addresses are
//! either a task handle (its [`TaskId`]) or a task name; the router resolves
//! them after the sending step has finished.

use alloc::string::String;
use core::any::Any;
use core::fmt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::sync::Arc;
use crate::task::TaskId;

/// Message type tag.
///
/// `0` is [`MessageType::QUIT`], `1..=127` are reserved for the kernel and
/// values from [`MessageType::USER_BASE`] upwards belong to applications.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageType(pub u16);

impl MessageType {
    /// Asks the receiving task to terminate. The kernel does not enforce it.
    pub const QUIT: Self = Self(0);
    /// First tag available to application code.
    pub const USER_BASE: Self = Self(128);

    /// Application message type `USER_BASE + offset`.
    pub const fn user(offset: u16) -> Self {
        Self(Self::USER_BASE.0.saturating_add(offset))
    }

    pub const fn is_quit(self) -> bool {
        self.0 == Self::QUIT.0
    }

    /// True for tags in the kernel's reserved range (including QUIT).
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER_BASE.0
    }
}

impl From<u16> for MessageType {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_quit() {
            f.write_str("QUIT")
        } else {
            write!(f, "MSG({})", self.0)
        }
    }
}

/// Address of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The task registered under this id.
    Handle(TaskId),
    /// The first registered task carrying this name.
    Name(String),
}

impl Target {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl From<TaskId> for Target {
    fn from(value: TaskId) -> Self {
        Self::Handle(value)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::Name(value.into())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// Type-erased payload. Clones of a message share it.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Immutable message value.
#[derive(Clone)]
pub struct Message {
    kind: MessageType,
    source: Target,
    target: Target,
    payload: Option<Payload>,
}

impl Message {
    pub fn new(kind: MessageType, source: impl Into<Target>, target: impl Into<Target>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
            payload: None,
        }
    }

    /// Message carrying `payload`.
    pub fn with_payload<T>(
        kind: MessageType,
        source: impl Into<Target>,
        target: impl Into<Target>,
        payload: T,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::with_arc(kind, source, target, Arc::new(payload))
    }

    /// Message sharing an already allocated payload.
    pub fn with_arc(
        kind: MessageType,
        source: impl Into<Target>,
        target: impl Into<Target>,
        payload: Payload,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
            payload: Some(payload),
        }
    }

    /// QUIT request from `source` to `target`.
    pub fn quit(source: impl Into<Target>, target: impl Into<Target>) -> Self {
        Self::new(MessageType::QUIT, source, target)
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn source(&self) -> &Target {
        &self.source
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Borrows the payload as `T`, if there is one of that type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    pub fn is_quit(&self) -> bool {
        self.kind.is_quit()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

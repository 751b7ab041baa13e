//! Row tags
//!
//! A tag is a `u16` on the wire. The two highest bits carry the kind:
//!
//! | bits | kind     |
//! |------|----------|
//! | `00` | invalid  |
//! | `01` | snapshot |
//! | `10` | wal      |
//! | `11` | system   |
//!
//! The low 14 bits carry the code: either one of the closed set of engine
//! codes, or a code in the user namespace (`USER_TAG_MIN..=TAG_MASK`).

use std::fmt;

use thiserror::Error;

/// Mask selecting the code bits of a raw tag
pub const TAG_MASK: u16 = 0x3fff;

/// First code of the user namespace
pub const USER_TAG_MIN: u16 = 32;

const TAG_SNAP: u16 = 0x4000;
const TAG_WAL: u16 = 0x8000;
const TAG_SYS: u16 = 0xc000;

/// Kind bits of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Snap,
    Wal,
    Sys,
}

impl TagKind {
    fn bits(self) -> u16 {
        match self {
            TagKind::Snap => TAG_SNAP,
            TagKind::Wal => TAG_WAL,
            TagKind::Sys => TAG_SYS,
        }
    }
}

/// Engine-internal tag codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EngineTag {
    SnapInitial = 1,
    SnapData = 2,
    WalData = 3,
    SnapFinal = 4,
    WalFinal = 5,
    RunCrc = 6,
    Nop = 7,
    SnapSkipScn = 8,
    PaxosPrepare = 9,
    PaxosPromise = 10,
    PaxosPropose = 11,
    PaxosAccept = 12,
    PaxosNop = 13,
}

impl EngineTag {
    fn from_code(code: u16) -> Option<Self> {
        let tag = match code {
            1 => EngineTag::SnapInitial,
            2 => EngineTag::SnapData,
            3 => EngineTag::WalData,
            4 => EngineTag::SnapFinal,
            5 => EngineTag::WalFinal,
            6 => EngineTag::RunCrc,
            7 => EngineTag::Nop,
            8 => EngineTag::SnapSkipScn,
            9 => EngineTag::PaxosPrepare,
            10 => EngineTag::PaxosPromise,
            11 => EngineTag::PaxosPropose,
            12 => EngineTag::PaxosAccept,
            13 => EngineTag::PaxosNop,
            _ => return None,
        };
        Some(tag)
    }

    /// Name used in dumps and logs
    pub fn name(self) -> &'static str {
        match self {
            EngineTag::SnapInitial => "snap_initial",
            EngineTag::SnapData => "snap_data",
            EngineTag::WalData => "wal_data",
            EngineTag::SnapFinal => "snap_final",
            EngineTag::WalFinal => "wal_final",
            EngineTag::RunCrc => "run_crc",
            EngineTag::Nop => "nop",
            EngineTag::SnapSkipScn => "snap_skip_scn",
            EngineTag::PaxosPrepare => "paxos_prepare",
            EngineTag::PaxosPromise => "paxos_promise",
            EngineTag::PaxosPropose => "paxos_propose",
            EngineTag::PaxosAccept => "paxos_accept",
            EngineTag::PaxosNop => "paxos_nop",
        }
    }
}

/// Code part of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCode {
    Engine(EngineTag),
    /// User namespace code, always in `USER_TAG_MIN..=TAG_MASK`
    User(u16),
}

/// Raw tag value that is not a valid tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid row tag 0x{0:04x}")]
pub struct InvalidTag(pub u16);

/// Row category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    kind: TagKind,
    code: TagCode,
}

impl Tag {
    /// Engine tag of the given kind
    pub const fn engine(kind: TagKind, tag: EngineTag) -> Self {
        Self {
            kind,
            code: TagCode::Engine(tag),
        }
    }

    /// The canonical write-ahead data tag
    pub const fn wal_data() -> Self {
        Self::engine(TagKind::Wal, EngineTag::WalData)
    }

    /// Dummy row tag used for keepalives
    pub const fn wal_final() -> Self {
        Self::engine(TagKind::Sys, EngineTag::WalFinal)
    }

    /// A user namespace tag written through the WAL
    pub fn user(code: u16) -> Result<Self, InvalidTag> {
        if !(USER_TAG_MIN..=TAG_MASK).contains(&code) {
            return Err(InvalidTag(code));
        }
        Ok(Self {
            kind: TagKind::Wal,
            code: TagCode::User(code),
        })
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn code(&self) -> TagCode {
        self.code
    }

    /// Parses a raw wire tag.
    pub fn from_u16(raw: u16) -> Result<Self, InvalidTag> {
        let kind = match raw & !TAG_MASK {
            TAG_SNAP => TagKind::Snap,
            TAG_WAL => TagKind::Wal,
            TAG_SYS => TagKind::Sys,
            _ => return Err(InvalidTag(raw)),
        };
        let code = raw & TAG_MASK;
        let code = if code >= USER_TAG_MIN {
            TagCode::User(code)
        } else {
            TagCode::Engine(EngineTag::from_code(code).ok_or(InvalidTag(raw))?)
        };
        Ok(Self { kind, code })
    }

    /// Encodes the tag for the wire.
    pub fn as_u16(&self) -> u16 {
        let code = match self.code {
            TagCode::Engine(tag) => tag as u16,
            TagCode::User(code) => code,
        };
        self.kind.bits() | code
    }

    /// True for the canonical write-ahead data tag.
    pub fn is_wal_data(&self) -> bool {
        self.code == TagCode::Engine(EngineTag::WalData)
    }

    /// True for tags in the user namespace.
    pub fn is_user(&self) -> bool {
        matches!(self.code, TagCode::User(_))
    }

    /// Rows that may carry an operation command.
    pub fn is_data(&self) -> bool {
        self.is_wal_data() || self.is_user()
    }

    /// Rows that advance the SCN.
    pub fn changes_scn(&self) -> bool {
        self.kind == TagKind::Wal
            || matches!(
                self.code,
                TagCode::Engine(EngineTag::Nop) | TagCode::Engine(EngineTag::RunCrc)
            )
    }

    /// Dummy rows are never persisted nor sequence checked.
    pub fn is_dummy(&self) -> bool {
        self.code == TagCode::Engine(EngineTag::WalFinal)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            TagCode::Engine(tag) => write!(f, "{}", tag.name())?,
            TagCode::User(code) => write!(f, "usr{}", code)?,
        }
        match self.kind {
            TagKind::Snap => write!(f, "/snap"),
            TagKind::Wal => Ok(()),
            TagKind::Sys => write!(f, "/sys"),
        }
    }
}

impl TryFrom<u16> for Tag {
    type Error = InvalidTag;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Tag::from_u16(raw)
    }
}

impl From<Tag> for u16 {
    fn from(tag: Tag) -> u16 {
        tag.as_u16()
    }
}

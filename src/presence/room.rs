use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const GLOBAL_ROOM_ID: &str = "GLOBAL";

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RoomScope {
    Global,
    Private,
}

/// Identifier of a presence room: the `GLOBAL` sentinel or a private code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn global() -> Self {
        Self(GLOBAL_ROOM_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scope(&self) -> RoomScope {
        if self.0 == GLOBAL_ROOM_ID {
            RoomScope::Global
        } else {
            RoomScope::Private
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope() == RoomScope::Global
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// New private room code. Codes are not checked against the store, so two
/// groups can in principle draw the same one.
pub fn create_room() -> RoomId {
    create_room_with(&mut rand::thread_rng())
}

pub fn create_room_with<R: Rng + ?Sized>(rng: &mut R) -> RoomId {
    let code: String = (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    RoomId(code)
}

/// Canonical form of a user-typed room code. Blank input means the global room.
pub fn normalize(input: &str) -> RoomId {
    let code = input.trim().to_uppercase();
    if code.is_empty() {
        RoomId::global()
    } else {
        RoomId(code)
    }
}

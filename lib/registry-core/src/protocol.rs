//! Wire types of the registry's HTTP control plane

use serde::{Deserialize, Serialize};

pub const PING_PATH: &str = "/api/ping";
pub const REGISTER_PATH: &str = "/api/registry/register";
pub const UPDATE_PATH: &str = "/api/registry/update";
pub const DEREGISTER_PATH: &str = "/api/registry/deregister";

/// Response codes carried in [`Envelope::code`]
pub mod code {
    pub const OK: i32 = 0;
    pub const INVALID_PARAMS: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const INTERNAL: i32 = 3;
}

/// Uniform `{code, msg}` body returned by every control-plane endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
}

impl Envelope {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: code::OK,
            msg: msg.into(),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }
}

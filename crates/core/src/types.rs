use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time as whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The two classes of client a hub admits.
///
/// Identities are unique within a class, not across classes: user `"a1"`
/// and node `"a1"` are distinct connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    User,
    Node,
}

impl ClientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::User => "user",
            ClientKind::Node => "node",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ClientKind::User),
            // Older node agents still identify themselves as "pc".
            "node" | "pc" => Ok(ClientKind::Node),
            other => Err(crate::error::CoreError::Validation(format!(
                "unknown client kind '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [ClientKind::User, ClientKind::Node] {
            assert_eq!(kind.as_str().parse::<ClientKind>().unwrap(), kind);
        }
    }

    #[test]
    fn legacy_pc_alias_maps_to_node() {
        assert_eq!("pc".parse::<ClientKind>().unwrap(), ClientKind::Node);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("admin".parse::<ClientKind>().is_err());
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ClientKind::Node).unwrap(), "\"node\"");
    }
}

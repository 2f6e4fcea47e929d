//! Participant identities and alias resolution.
//!
//! An [`Identity`] names one participant on a channel: `uuid` is the
//! application instance id and `name` the window/endpoint qualifier. External
//! connections that have no window use their uuid as name.
//!
//! When a client connects with a `nameAlias` in its connect payload, the
//! provider records the member under `{ uuid, name: alias }` and that resolved
//! identity is used for all later addressing and lifecycle notifications.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connect payload key carrying the client-supplied alias.
pub const NAME_ALIAS_KEY: &str = "nameAlias";

/// Identity of a channel participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Application instance id.
    pub uuid: String,
    /// Window name, or the alias assigned at connect time.
    pub name: String,
}

impl Identity {
    /// Create an identity from an application uuid and a window name.
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// Identity of an external connection (no window): `name == uuid`.
    pub fn external(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            name: uuid.clone(),
            uuid,
        }
    }

    /// Resolve the member identity for this participant.
    ///
    /// A non-empty alias replaces `name`; `uuid` is always kept.
    #[must_use]
    pub fn with_alias(&self, alias: Option<&str>) -> Self {
        match alias {
            Some(alias) if !alias.is_empty() => Self {
                uuid: self.uuid.clone(),
                name: alias.to_owned(),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uuid, self.name)
    }
}

/// Extract the `nameAlias` string from a connect payload.
///
/// Returns `None` for a missing payload, a non-object payload, a missing key,
/// a non-string value or an empty string.
pub fn name_alias(payload: Option<&Value>) -> Option<&str> {
    payload?
        .get(NAME_ALIAS_KEY)?
        .as_str()
        .filter(|alias| !alias.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn external_identity_uses_uuid_as_name() {
        let id = Identity::external("externalConnectionUUID");
        assert_eq!(id.uuid, "externalConnectionUUID");
        assert_eq!(id.name, "externalConnectionUUID");
    }

    #[test]
    fn alias_replaces_name_keeps_uuid() {
        let id = Identity::external("app-1");
        let resolved = id.with_alias(Some("nameAlias-1"));
        assert_eq!(resolved.uuid, "app-1");
        assert_eq!(resolved.name, "nameAlias-1");
    }

    #[test]
    fn missing_alias_keeps_identity() {
        let id = Identity::new("app-1", "main");
        assert_eq!(id.with_alias(None), id);
    }

    #[test]
    fn empty_alias_is_ignored() {
        let id = Identity::new("app-1", "main");
        assert_eq!(id.with_alias(Some("")), id);
    }

    #[test]
    fn name_alias_from_payload() {
        let payload = json!({ "nameAlias": "alias-7", "other": 1 });
        assert_eq!(name_alias(Some(&payload)), Some("alias-7"));
    }

    #[test]
    fn name_alias_rejects_non_strings() {
        let payload = json!({ "nameAlias": 42 });
        assert_eq!(name_alias(Some(&payload)), None);
        assert_eq!(name_alias(Some(&json!("just a string"))), None);
        assert_eq!(name_alias(None), None);
    }

    #[test]
    fn name_alias_rejects_empty_string() {
        let payload = json!({ "nameAlias": "" });
        assert_eq!(name_alias(Some(&payload)), None);
    }

    #[test]
    fn display_joins_uuid_and_name() {
        let id = Identity::new("app", "win");
        assert_eq!(id.to_string(), "app/win");
    }

    #[test]
    fn serde_field_names() {
        let id = Identity::new("app", "win");
        let value = serde_json::to_value(&id).unwrap();
        assert_eq!(value, json!({ "uuid": "app", "name": "win" }));
    }
}

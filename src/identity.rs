use serde::{Deserialize, Serialize};

/// The kind of principal a session is bound to. Determines the `"agent:<name>"` vs.
/// `"user:<id>"` convention used for `actor` when the caller doesn't supply one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Agent,
    User,
}

/// A `{tenant_id, id, type}` triple bound to a session for authored-event attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: String,
    pub id: String,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn agent(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: name.into(),
            kind: IdentityKind::Agent,
        }
    }

    pub fn user(tenant_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            kind: IdentityKind::User,
        }
    }

    /// Render the conventional `actor` string: `"agent:<name>"` or `"user:<id>"`.
    pub fn actor(&self) -> String {
        match self.kind {
            IdentityKind::Agent => format!("agent:{}", self.id),
            IdentityKind::User => format!("user:{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_string_follows_convention() {
        assert_eq!(Identity::agent("t1", "drafter").actor(), "agent:drafter");
        assert_eq!(Identity::user("t1", "u-42").actor(), "user:u-42");
    }
}

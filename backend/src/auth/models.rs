use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsUser {
    pub id: String,
}

/// Bearer token payload. Identity comes from `sub`, or from `user.id` for
/// tokens minted as `{ user: { id } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ClaimsUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
}

impl Claims {
    pub fn identity(&self) -> Option<&str> {
        self.sub
            .as_deref()
            .or_else(|| self.user.as_ref().map(|user| user.id.as_str()))
            .filter(|id| !id.is_empty())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Profile of the authenticated user as returned by the backend.
///
/// Only `_id` is required. Fields the backend adds beyond the known ones
/// are kept in `extra` so a profile survives a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            full_name: None,
            profile_pic: None,
            bio: None,
            extra: Map::new(),
        }
    }

    /// Name for display, falling back to email and then the id
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Selects the auth endpoint: `POST /api/auth/login` or `/api/auth/signup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthMode {
    Login,
    Signup,
}

impl AuthMode {
    /// Path segment under `/api/auth/`
    pub fn as_path(&self) -> &'static str {
        match self {
            AuthMode::Login => "login",
            AuthMode::Signup => "signup",
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Login or signup body. Signup additionally sends `fullName` and `bio`;
/// anything else the backend expects goes in `extra`.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn signup(
        email: impl Into<String>,
        password: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self {
            full_name: Some(full_name.into()),
            ..Self::login(email, password)
        }
    }
}

// Keep passwords out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("full_name", &self.full_name)
            .finish_non_exhaustive()
    }
}

/// Fields to change on the profile. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Image payload (URL or data URI) as accepted by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.bio.is_none()
            && self.profile_pic.is_none()
            && self.extra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_keeps_unknown_fields() {
        let json = r#"{"_id":"u1","email":"a@b.c","fullName":"Ada","profilePic":"","bio":"hi","createdAt":"2024-01-01"}"#;
        let user: AuthUser = serde_json::from_str(json).expect("Failed to parse user JSON");
        assert_eq!(user.id, "u1");
        assert_eq!(user.full_name.as_deref(), Some("Ada"));
        assert_eq!(user.extra.get("createdAt"), Some(&Value::from("2024-01-01")));

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["_id"], "u1");
        assert_eq!(back["createdAt"], "2024-01-01");
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut user = AuthUser::new("u1");
        assert_eq!(user.display_name(), "u1");
        user.email = Some("a@b.c".into());
        assert_eq!(user.display_name(), "a@b.c");
        user.full_name = Some("  ".into());
        assert_eq!(user.display_name(), "a@b.c");
        user.full_name = Some("Ada".into());
        assert_eq!(user.display_name(), "Ada");
    }

    #[test]
    fn test_auth_mode_paths() {
        assert_eq!(AuthMode::Login.as_path(), "login");
        assert_eq!(AuthMode::Signup.as_path(), "signup");
        assert_eq!(AuthMode::Signup.to_string(), "signup");
    }

    #[test]
    fn test_credentials_body() {
        let body = serde_json::to_value(Credentials::login("a@b.c", "pw")).unwrap();
        assert_eq!(body, serde_json::json!({"email": "a@b.c", "password": "pw"}));

        let body = serde_json::to_value(Credentials::signup("a@b.c", "pw", "Ada")).unwrap();
        assert_eq!(body["fullName"], "Ada");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::login("a@b.c", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_profile_patch_skips_unset() {
        let patch = ProfilePatch {
            full_name: Some("X".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(serde_json::to_value(&patch).unwrap(), serde_json::json!({"fullName": "X"}));
        assert!(ProfilePatch::default().is_empty());
    }
}

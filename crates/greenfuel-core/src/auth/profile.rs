use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to an organisational unit. The API sends either the numeric
/// primary key or, on expanded endpoints, the display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum OrgRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for OrgRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrgRef::Id(id) => write!(f, "#{}", id),
            OrgRef::Name(name) => f.write_str(name),
        }
    }
}

/// The signed-in user as returned by `/auth/user/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub department: Option<OrgRef>,
    pub designation: Option<OrgRef>,
    pub business_unit: Option<OrgRef>,
    pub employee_code: Option<String>,
    pub dob: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub is_staff: bool,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
    pub is_deleted: Option<bool>,
    pub status: Option<bool>,
    pub is_budget_requester: Option<bool>,
    #[cfg_attr(feature = "ts", ts(type = "Array<unknown>"))]
    pub groups: Vec<serde_json::Value>,
    #[cfg_attr(feature = "ts", ts(type = "Array<unknown>"))]
    pub user_permissions: Vec<serde_json::Value>,
    pub last_login: Option<String>,
    pub date_joined: String,
}

impl UserProfile {
    /// Name to show in the UI, falling back to the email address.
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            &self.name
        } else if !self.username.trim().is_empty() {
            &self.username
        } else {
            &self.email
        }
    }

    /// Non-empty role, if one is assigned.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref().filter(|role| !role.is_empty())
    }

    /// Active unless the server explicitly says otherwise.
    pub fn is_active(&self) -> bool {
        self.is_active.unwrap_or(true) && !self.is_deleted.unwrap_or(false)
    }
}

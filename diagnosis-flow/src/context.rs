use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    #[default]
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::User => write!(f, "user"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "user" | "patient" => Ok(Role::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The signed-in user, passed explicitly to whatever needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub role: Role,
}

impl SessionUser {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(role: Role) -> Self {
        Self { role }
    }

    /// Clinical staff see internal identifiers; patients do not.
    pub fn is_clinical_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Doctor)
    }
}

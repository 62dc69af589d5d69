use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Vendor,
    Admin,
    /// Machine callers: the payment gateway and the scheduler
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Vendor => "vendor",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    /// Accepts both the stored form (`buyer`) and the token form (`BUYER`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buyer" => Ok(Role::Buyer),
            "vendor" => Ok(Role::Vendor),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The authenticated caller of a settlement operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn buyer(id: Uuid) -> Self {
        Self::new(id, Role::Buyer)
    }

    pub fn vendor(id: Uuid) -> Self {
        Self::new(id, Role::Vendor)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn system() -> Self {
        Self::new(Uuid::nil(), Role::System)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Payment gateway, scheduler, or an admin acting on their behalf
    pub fn is_machine_or_admin(&self) -> bool {
        matches!(self.role, Role::System | Role::Admin)
    }
}

/// Marketplace account as seen by the settlement core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
}

impl User {
    pub fn new(display_name: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            role,
            is_active: true,
        }
    }
}

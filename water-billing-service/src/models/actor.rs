//! Request-scoped identity passed into every core mutation.

use crate::error::BillingError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl FromStr for Role {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            other => Err(BillingError::validation(format!("Unknown role '{}'", other))),
        }
    }
}

/// The operator performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub operator_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(operator_id: impl Into<String>, role: Role) -> Self {
        Self {
            operator_id: operator_id.into(),
            role,
        }
    }

    /// Identity used by background jobs (billing runs, overdue sweeps).
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

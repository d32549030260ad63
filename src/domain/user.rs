use crate::domain::{invalid, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 100;
pub const WALLET_ADDRESS_LEN: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Farmer,
    Mill,
    Company,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Farmer, Role::Mill, Role::Company, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Mill => "mill",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown role '{}'", s)))
    }
}

/// An account. The role-specific data lives in [`crate::domain::profile::Profile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: String, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            role,
            wallet_address: None,
            active: true,
            email_verified: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Trims and lower-cases an email, rejecting anything without a plausible
/// `local@domain.tld` shape.
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    };
    if !valid || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(invalid(format!("'{}' is not a valid email address", raw.trim())));
    }
    Ok(email)
}

pub fn check_password_policy(password: &str) -> Result<(), DomainError> {
    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(invalid(format!(
            "password must be between {} and {} characters",
            PASSWORD_MIN_LEN, PASSWORD_MAX_LEN
        )));
    }
    Ok(())
}

/// Format check only: `G` followed by 55 base32 characters (`A-Z`, `2-7`).
pub fn validate_wallet_address(address: &str) -> Result<(), DomainError> {
    let mut chars = address.chars();
    let well_formed = address.len() == WALLET_ADDRESS_LEN
        && chars.next() == Some('G')
        && chars.all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c));
    if !well_formed {
        return Err(invalid(format!(
            "wallet address must be {} characters, start with 'G' and use A-Z/2-7",
            WALLET_ADDRESS_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";

    #[test]
    fn role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("agricultor".parse::<Role>().is_err());
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  Ana@Ingenio.CO ").unwrap(), "ana@ingenio.co");
        assert!(normalize_email("no-at-sign.co").is_err());
        assert!(normalize_email("a@localhost").is_err());
        assert!(normalize_email("a b@x.co").is_err());
    }

    #[test]
    fn password_policy_bounds() {
        assert!(check_password_policy("12345").is_err());
        assert!(check_password_policy("123456").is_ok());
        assert!(check_password_policy(&"x".repeat(101)).is_err());
    }

    #[test]
    fn wallet_format() {
        assert!(validate_wallet_address(WALLET).is_ok());
        // wrong prefix
        assert!(validate_wallet_address(&WALLET.replacen('G', "S", 1)).is_err());
        // digits outside the base32 alphabet
        assert!(validate_wallet_address(&format!("G{}", "1".repeat(55))).is_err());
        assert!(validate_wallet_address(&WALLET[..55]).is_err());
    }
}

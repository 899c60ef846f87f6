use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Number of hex digits in a full ledger address or object id.
pub const ADDRESS_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },
    #[error("{kind} '{value}' must start with 0x")]
    MissingPrefix { kind: &'static str, value: String },
    #[error("{kind} '{value}' contains non-hex characters")]
    NotHex { kind: &'static str, value: String },
    #[error("{kind} '{value}' is longer than 64 hex digits")]
    TooLong { kind: &'static str, value: String },
}

fn normalize_hex_id(kind: &'static str, raw: &str) -> Result<String, IdError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    let Some(digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) else {
        return Err(IdError::MissingPrefix {
            kind,
            value: raw.to_string(),
        });
    };
    if digits.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdError::NotHex {
            kind,
            value: raw.to_string(),
        });
    }
    if digits.len() > ADDRESS_HEX_LEN {
        return Err(IdError::TooLong {
            kind,
            value: raw.to_string(),
        });
    }
    Ok(format!(
        "0x{:0>width$}",
        digits.to_ascii_lowercase(),
        width = ADDRESS_HEX_LEN
    ))
}

macro_rules! hex_id_newtype {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, IdError> {
                normalize_hex_id($kind, raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(de::Error::custom)
            }
        }
    };
}

hex_id_newtype!(Address, "address");
hex_id_newtype!(ObjectId, "object id");

macro_rules! opaque_id_newtype {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(IdError::Empty { kind: $kind });
                }
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(de::Error::custom)
            }
        }
    };
}

opaque_id_newtype!(TransactionDigest, "transaction digest");
opaque_id_newtype!(QuiltId, "quilt id");

/// Identifier of an encryption key held by the key service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SealId(Vec<u8>);

impl SealId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, IdError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(IdError::Empty { kind: "seal id" });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl<'de> Deserialize<'de> for SealId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::new(bytes).map_err(de::Error::custom)
    }
}

/// On-chain task status. Discriminants match the contract's `u8` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Assigned,
    InProgress,
    Submitted,
    Completed,
    Disputed,
    Cancelled,
}

impl TaskStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Open,
            1 => Self::Assigned,
            2 => Self::InProgress,
            3 => Self::Submitted,
            4 => Self::Completed,
            5 => Self::Disputed,
            6 => Self::Cancelled,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Assigned => 1,
            Self::InProgress => 2,
            Self::Submitted => 3,
            Self::Completed => 4,
            Self::Disputed => 5,
            Self::Cancelled => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Disputed | Self::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::InProgress => "in progress",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub id: ObjectId,
    pub title: String,
    pub description: String,
    pub price: u64,
    pub category: String,
    pub creator: String,
    pub image: String,
    pub downloads: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kiosk_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quilt_id: Option<QuiltId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub freelancer: Address,
    pub bid_amount: u64,
    /// Delivery time in days.
    pub delivery_time: u64,
    pub cover_letter: String,
    pub proposed_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub jobs_posted: u64,
    pub hire_rate: u64,
    pub open_jobs: u64,
    pub total_spent: u64,
    pub member_since: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelancerInfo {
    pub jobs_completed: u64,
    pub success_rate: u64,
    pub total_earned: u64,
    pub member_since: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: ObjectId,
    pub client: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_freelancer: Option<Address>,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_price: Option<u64>,
    pub duration: String,
    pub experience_level: String,
    pub skills: Vec<String>,
    pub tools: Vec<String>,
    pub posted_time: u64,
    pub proposals: Vec<Proposal>,
    pub payment_verified: bool,
    pub escrow_balance: u64,
    pub location: String,
    pub project_type: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    pub client_info: ClientInfo,
}

impl Task {
    pub fn is_client(&self, caller: &Address) -> bool {
        &self.client == caller
    }

    pub fn is_assigned_freelancer(&self, caller: &Address) -> bool {
        self.assigned_freelancer.as_ref() == Some(caller)
    }

    pub fn proposal_from(&self, freelancer: &Address) -> Option<&Proposal> {
        self.proposals.iter().find(|p| &p.freelancer == freelancer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: ObjectId,
    pub owner: Address,
    pub name: String,
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freelancer_info: Option<FreelancerInfo>,
    pub created_at: u64,
}

impl UserProfile {
    pub fn is_client(&self) -> bool {
        self.client_info.is_some()
    }

    pub fn is_freelancer(&self) -> bool {
        self.freelancer_info.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub id: ObjectId,
    pub task_id: ObjectId,
    pub quilt_id: QuiltId,
    pub seal_id: SealId,
}

/// Created by a successful purchase; grants its holder decryption rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseApproval {
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<Address>,
    pub seal_id: SealId,
    pub quilt_id: QuiltId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: ObjectId,
    pub task_ids: Vec<ObjectId>,
    pub total_tasks: u64,
    pub total_completed: u64,
    pub total_volume: u64,
    pub platform_fee: u64,
    pub fee_balance: u64,
}

/// Backend record of the kiosks a wallet owns and the ideas placed in them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KioskListing {
    pub kid: ObjectId,
    #[serde(rename = "ideaId", default)]
    pub idea_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEntry {
    pub owner: Address,
    #[serde(default)]
    pub kiosks: Vec<KioskListing>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;

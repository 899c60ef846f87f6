use serde::{Deserialize, Serialize};
use shared::domain::{Address, ObjectId};

use crate::BuildError;

/// Well-known id of the shared clock object.
pub const CLOCK_OBJECT_ID: &str = "0x6";
/// Well-known id of the shared randomness object.
pub const RANDOM_OBJECT_ID: &str = "0x8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PureValue {
    String(String),
    U64(u64),
    Address(Address),
    Id(ObjectId),
    Bytes(Vec<u8>),
    StringVector(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Argument {
    Pure { value: PureValue },
    Object { id: ObjectId },
    Clock,
    Random,
    /// Coin produced by the split command at index `command`.
    SplitResult { command: u16 },
}

impl Argument {
    pub fn string(value: impl Into<String>) -> Self {
        Self::Pure {
            value: PureValue::String(value.into()),
        }
    }

    pub fn u64(value: u64) -> Self {
        Self::Pure {
            value: PureValue::U64(value),
        }
    }

    pub fn address(value: Address) -> Self {
        Self::Pure {
            value: PureValue::Address(value),
        }
    }

    pub fn id(value: ObjectId) -> Self {
        Self::Pure {
            value: PureValue::Id(value),
        }
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::Pure {
            value: PureValue::Bytes(value.into()),
        }
    }

    pub fn strings(value: Vec<String>) -> Self {
        Self::Pure {
            value: PureValue::StringVector(value),
        }
    }

    pub fn object(id: ObjectId) -> Self {
        Self::Object { id }
    }

    pub fn as_object(&self) -> Option<&ObjectId> {
        match self {
            Self::Object { id } => Some(id),
            _ => None,
        }
    }

    pub fn as_pure(&self) -> Option<&PureValue> {
        match self {
            Self::Pure { value } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: ObjectId,
    pub module: String,
    pub function: String,
    pub arguments: Vec<Argument>,
}

impl MoveCall {
    pub fn target(&self) -> String {
        format!("{}::{}::{}", self.package, self.module, self.function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SplitCoinsFromGas { amounts: Vec<u64> },
    MoveCall(MoveCall),
}

/// Unsigned transaction. Signing and submission belong to the wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_budget: Option<u64>,
    pub commands: Vec<Command>,
}

impl TransactionDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_gas_budget(mut self, budget: u64) -> Self {
        self.gas_budget = Some(budget);
        self
    }

    /// Splits `amount` off the gas coin and returns an argument naming the
    /// resulting coin.
    pub fn split_gas(&mut self, amount: u64) -> Argument {
        let command = self.commands.len() as u16;
        self.commands.push(Command::SplitCoinsFromGas {
            amounts: vec![amount],
        });
        Argument::SplitResult { command }
    }

    pub fn move_call(&mut self, call: MoveCall) {
        self.commands.push(Command::MoveCall(call));
    }

    pub fn move_calls(&self) -> impl Iterator<Item = &MoveCall> {
        self.commands.iter().filter_map(|command| match command {
            Command::MoveCall(call) => Some(call),
            Command::SplitCoinsFromGas { .. } => None,
        })
    }

    /// Coin amount split off the gas coin for the given argument, if any.
    pub fn split_amount(&self, argument: &Argument) -> Option<u64> {
        let Argument::SplitResult { command } = argument else {
            return None;
        };
        match self.commands.get(*command as usize)? {
            Command::SplitCoinsFromGas { amounts } => amounts.first().copied(),
            Command::MoveCall(_) => None,
        }
    }

    /// Serialized commands without sender or gas data, as handed to the key
    /// service for policy evaluation.
    pub fn to_kind_bytes(&self) -> Result<Vec<u8>, BuildError> {
        serde_json::to_vec(&self.commands).map_err(BuildError::Encode)
    }

    pub fn commands_from_kind_bytes(bytes: &[u8]) -> Result<Vec<Command>, BuildError> {
        serde_json::from_slice(bytes).map_err(BuildError::Encode)
    }
}

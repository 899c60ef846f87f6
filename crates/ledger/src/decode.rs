//! Strict decoding of Move object fields into domain entities.
//!
//! The fullnode renders Move values loosely: `u64` as decimal strings, `Option`
//! as `null`, a bare value, `{vec: [...]}` or `{type, fields: {vec: [...]}}`,
//! and nested structs as `{type, fields}`. [`FieldReader`] accepts exactly
//! those shapes and reports anything else as a [`DecodeError`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use shared::domain::{
    Address, ClientInfo, FreelancerInfo, IdError, Idea, ObjectId, Platform, Proposal,
    PurchaseApproval, QuiltId, SealId, Task, TaskStatus, TaskSubmission, UserProfile,
};
use thiserror::Error;

use crate::RawObject;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected object of type {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("{context} is not a struct")]
    NotAStruct { context: String },
    #[error("missing field '{field}'")]
    MissingField { field: String },
    #[error("field '{field}' has unexpected shape: expected {expected}, found {found}")]
    WrongShape {
        field: String,
        expected: &'static str,
        found: String,
    },
    #[error("field '{field}' is not a valid identifier: {source}")]
    InvalidId {
        field: String,
        #[source]
        source: IdError,
    },
    #[error("unknown task status code {0}")]
    UnknownStatus(u64),
}

fn shape_of(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "bool".into(),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// Checks that `actual` names the `expected` struct, ignoring type parameters.
pub fn ensure_type(expected: &str, actual: &str) -> Result<(), DecodeError> {
    let base = actual.split('<').next().unwrap_or(actual);
    if base == expected || actual == expected {
        return Ok(());
    }
    Err(DecodeError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// Typed accessor over the `fields` map of one Move struct.
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> FieldReader<'a> {
    /// Accepts either a bare field map or a `{type, fields}` wrapper.
    pub fn new(context: &str, value: &'a Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAStruct {
                context: context.to_string(),
            });
        };
        match map.get("fields") {
            Some(Value::Object(fields)) if map.contains_key("type") => Ok(Self { fields }),
            _ => Ok(Self { fields: map }),
        }
    }

    fn raw(&self, field: &str) -> Result<&'a Value, DecodeError> {
        self.fields
            .get(field)
            .ok_or_else(|| DecodeError::MissingField {
                field: field.to_string(),
            })
    }

    fn wrong(field: &str, expected: &'static str, value: &Value) -> DecodeError {
        DecodeError::WrongShape {
            field: field.to_string(),
            expected,
            found: shape_of(value),
        }
    }

    pub fn string(&self, field: &str) -> Result<String, DecodeError> {
        match self.raw(field)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(Self::wrong(field, "string", other)),
        }
    }

    pub fn u64(&self, field: &str) -> Result<u64, DecodeError> {
        u64_value(field, self.raw(field)?)
    }

    pub fn bool(&self, field: &str) -> Result<bool, DecodeError> {
        match self.raw(field)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::wrong(field, "bool", other)),
        }
    }

    pub fn address(&self, field: &str) -> Result<Address, DecodeError> {
        let raw = self.string(field)?;
        Address::parse(&raw).map_err(|source| DecodeError::InvalidId {
            field: field.to_string(),
            source,
        })
    }

    /// Object ids arrive either as plain strings or as a `UID` wrapper
    /// `{id: "0x.."}`.
    pub fn object_id(&self, field: &str) -> Result<ObjectId, DecodeError> {
        object_id_value(field, self.raw(field)?)
    }

    /// Move `Option<T>` decoded with `decode` applied to the inner value.
    pub fn option<T>(
        &self,
        field: &str,
        decode: impl Fn(&str, &Value) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        let Some(value) = self.fields.get(field) else {
            return Ok(None);
        };
        let inner = match value {
            Value::Null => return Ok(None),
            Value::Object(map) => {
                let vec = map
                    .get("vec")
                    .or_else(|| map.get("fields").and_then(|f| f.get("vec")));
                match vec {
                    Some(Value::Array(items)) => match items.as_slice() {
                        [] => return Ok(None),
                        [item] => item,
                        _ => return Err(Self::wrong(field, "option with at most one value", value)),
                    },
                    Some(other) => return Err(Self::wrong(field, "option vector", other)),
                    None => value,
                }
            }
            other => other,
        };
        decode(field, inner).map(Some)
    }

    pub fn option_u64(&self, field: &str) -> Result<Option<u64>, DecodeError> {
        self.option(field, u64_value)
    }

    pub fn option_address(&self, field: &str) -> Result<Option<Address>, DecodeError> {
        self.option(field, |field, value| match value {
            Value::String(s) => Address::parse(s).map_err(|source| DecodeError::InvalidId {
                field: field.to_string(),
                source,
            }),
            other => Err(Self::wrong(field, "address string", other)),
        })
    }

    pub fn option_object_id(&self, field: &str) -> Result<Option<ObjectId>, DecodeError> {
        self.option(field, object_id_value)
    }

    pub fn option_string(&self, field: &str) -> Result<Option<String>, DecodeError> {
        self.option(field, |field, value| match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(Self::wrong(field, "string", other)),
        })
    }

    /// `vector<u8>` as a number array or a base64 string.
    pub fn bytes(&self, field: &str) -> Result<Vec<u8>, DecodeError> {
        match self.raw(field)? {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| Self::wrong(field, "byte", item))
                })
                .collect(),
            Value::String(s) => STANDARD
                .decode(s)
                .map_err(|_| Self::wrong(field, "base64 bytes", &Value::String(s.clone()))),
            other => Err(Self::wrong(field, "byte vector", other)),
        }
    }

    pub fn strings(&self, field: &str) -> Result<Vec<String>, DecodeError> {
        match self.raw(field)? {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Self::wrong(field, "string", other)),
                })
                .collect(),
            other => Err(Self::wrong(field, "string vector", other)),
        }
    }

    pub fn object_ids(&self, field: &str) -> Result<Vec<ObjectId>, DecodeError> {
        match self.raw(field)? {
            Value::Array(items) => items
                .iter()
                .map(|item| object_id_value(field, item))
                .collect(),
            other => Err(Self::wrong(field, "id vector", other)),
        }
    }

    pub fn nested(&self, field: &str) -> Result<FieldReader<'a>, DecodeError> {
        FieldReader::new(field, self.raw(field)?)
    }

    pub fn nested_list(&self, field: &str) -> Result<Vec<FieldReader<'a>>, DecodeError> {
        match self.raw(field)? {
            Value::Array(items) => items
                .iter()
                .map(|item| FieldReader::new(field, item))
                .collect(),
            other => Err(Self::wrong(field, "struct vector", other)),
        }
    }
}

fn u64_value(field: &str, value: &Value) -> Result<u64, DecodeError> {
    match value {
        Value::String(s) => s
            .parse()
            .map_err(|_| FieldReader::wrong(field, "decimal u64", value)),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| FieldReader::wrong(field, "unsigned integer", value)),
        other => Err(FieldReader::wrong(field, "u64", other)),
    }
}

fn object_id_value(field: &str, value: &Value) -> Result<ObjectId, DecodeError> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => match map.get("id") {
            Some(Value::String(s)) => s.as_str(),
            _ => return Err(FieldReader::wrong(field, "UID", value)),
        },
        other => return Err(FieldReader::wrong(field, "object id", other)),
    };
    ObjectId::parse(raw).map_err(|source| DecodeError::InvalidId {
        field: field.to_string(),
        source,
    })
}

fn quilt_id(field: &str, raw: String) -> Result<QuiltId, DecodeError> {
    QuiltId::new(raw).map_err(|source| DecodeError::InvalidId {
        field: field.to_string(),
        source,
    })
}

fn seal_id(field: &str, raw: Vec<u8>) -> Result<SealId, DecodeError> {
    SealId::new(raw).map_err(|source| DecodeError::InvalidId {
        field: field.to_string(),
        source,
    })
}

fn reader_for<'a>(object: &'a RawObject, expected: &str) -> Result<FieldReader<'a>, DecodeError> {
    ensure_type(expected, &object.object_type)?;
    FieldReader::new(&object.object_type, &object.fields)
}

pub fn decode_idea(object: &RawObject, expected_type: &str) -> Result<Idea, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    Ok(Idea {
        id: object.object_id.clone(),
        title: fields.string("name")?,
        description: fields.string("description")?,
        price: fields.u64("price")?,
        category: fields
            .option_string("tags")?
            .filter(|tags| !tags.is_empty())
            .unwrap_or_else(|| "Uncategorized".to_string()),
        creator: fields.string("owner_name")?,
        image: fields.string("image_url")?,
        downloads: fields.u64("num_download")?,
        kiosk_id: fields.option_object_id("kiosk_id")?,
        quilt_id: fields
            .option_string("quilt_id")?
            .filter(|q| !q.is_empty())
            .map(|q| quilt_id("quilt_id", q))
            .transpose()?,
    })
}

pub fn decode_proposal(fields: &FieldReader<'_>) -> Result<Proposal, DecodeError> {
    Ok(Proposal {
        freelancer: fields.address("freelancer")?,
        bid_amount: fields.u64("bid_amount")?,
        delivery_time: fields.u64("delivery_time")?,
        cover_letter: fields.string("cover_letter")?,
        proposed_at: fields.u64("proposed_at")?,
    })
}

fn decode_client_info(fields: &FieldReader<'_>) -> Result<ClientInfo, DecodeError> {
    Ok(ClientInfo {
        jobs_posted: fields.u64("jobs_posted")?,
        hire_rate: fields.u64("hire_rate")?,
        open_jobs: fields.u64("open_jobs")?,
        total_spent: fields.u64("total_spent")?,
        member_since: fields.u64("member_since")?,
    })
}

fn decode_freelancer_info(fields: &FieldReader<'_>) -> Result<FreelancerInfo, DecodeError> {
    Ok(FreelancerInfo {
        jobs_completed: fields.u64("jobs_completed")?,
        success_rate: fields.u64("success_rate")?,
        total_earned: fields.u64("total_earned")?,
        member_since: fields.u64("member_since")?,
    })
}

pub fn decode_task(object: &RawObject, expected_type: &str) -> Result<Task, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    let status_code = fields.u64("status")?;
    let status = u8::try_from(status_code)
        .ok()
        .and_then(TaskStatus::from_code)
        .ok_or(DecodeError::UnknownStatus(status_code))?;
    let proposals = fields
        .nested_list("proposals")?
        .iter()
        .map(decode_proposal)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Task {
        id: object.object_id.clone(),
        client: fields.address("client")?,
        assigned_freelancer: fields.option_address("assigned_freelancer")?,
        title: fields.string("title")?,
        description: fields.string("description")?,
        hourly_rate: fields.option_u64("hourly_rate")?,
        fixed_price: fields.option_u64("fixed_price")?,
        duration: fields.string("duration")?,
        experience_level: fields.string("experience_level")?,
        skills: fields.strings("skills")?,
        tools: fields.strings("tools")?,
        posted_time: fields.u64("posted_time")?,
        proposals,
        payment_verified: fields.bool("payment_verified")?,
        escrow_balance: fields.u64("escrow_balance")?,
        location: fields.string("location")?,
        project_type: fields.string("project_type")?,
        status,
        deadline: fields.option_u64("deadline")?,
        client_info: decode_client_info(&fields.nested("client_info")?)?,
    })
}

pub fn decode_profile(object: &RawObject, expected_type: &str) -> Result<UserProfile, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    let client_info = fields.option("client_info", |field, value| {
        decode_client_info(&FieldReader::new(field, value)?)
    })?;
    let freelancer_info = fields.option("freelancer_info", |field, value| {
        decode_freelancer_info(&FieldReader::new(field, value)?)
    })?;
    Ok(UserProfile {
        id: object.object_id.clone(),
        owner: fields.address("owner")?,
        name: fields.string("name")?,
        bio: fields.string("bio")?,
        client_info,
        freelancer_info,
        created_at: fields.u64("created_at")?,
    })
}

pub fn decode_submission(
    object: &RawObject,
    expected_type: &str,
) -> Result<TaskSubmission, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    Ok(TaskSubmission {
        id: object.object_id.clone(),
        task_id: fields.object_id("task_id")?,
        quilt_id: quilt_id("quilt_id", fields.string("quilt_id")?)?,
        seal_id: seal_id("seal_id", fields.bytes("seal_id")?)?,
    })
}

pub fn decode_purchase_approval(
    object: &RawObject,
    expected_type: &str,
) -> Result<PurchaseApproval, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    Ok(PurchaseApproval {
        id: object.object_id.clone(),
        idea_id: fields.option_object_id("idea_id")?,
        buyer: fields.option_address("buyer")?,
        seal_id: seal_id("seal_id", fields.bytes("seal_id")?)?,
        quilt_id: quilt_id("quilt_id", fields.string("quilt_id")?)?,
    })
}

pub fn decode_platform(object: &RawObject, expected_type: &str) -> Result<Platform, DecodeError> {
    let fields = reader_for(object, expected_type)?;
    Ok(Platform {
        id: object.object_id.clone(),
        task_ids: fields.object_ids("task_ids")?,
        total_tasks: fields.u64("total_tasks")?,
        total_completed: fields.u64("total_completed")?,
        total_volume: fields.u64("total_volume")?,
        platform_fee: fields.u64("platform_fee")?,
        fee_balance: fields.u64("fee_balance")?,
    })
}

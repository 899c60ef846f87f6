//! In-memory ledger, wallet and service fakes shared by the controller tests.
//!
//! `FakeLedger` interprets the contract calls the builders produce and keeps
//! objects in the same JSON shapes the fullnode returns, so every read goes
//! through the real decoders.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use ledger::{
    decode::{decode_task, ensure_type},
    ChainError, ChainReader, ExecutionStatus, ObjectChange, RawObject, TransactionEffects,
};
use rand::rngs::OsRng;
use serde_json::{json, Map, Value};
use shared::{
    domain::{Address, KioskListing, MarketEntry, ObjectId, QuiltId, SealId, Task, TransactionDigest},
    project::{Project, ProjectDraft},
};
use tx_builder::{Argument, ContractConfig, MoveCall, PureValue, TransactionDescription};

use crate::{
    backend::{MarketRegistry, ProjectSink},
    blob_store::{BlobStore, BlobStoreError},
    clock::ManualClock,
    envelope::EncryptedObject,
    key_server::KeyServer,
    session_key::{address_from_public_key, PersonalSignature},
    wallet::Wallet,
};

const START_MS: u64 = 1_735_732_800_000;
const DAY_MS: u64 = 86_400_000;

pub fn contracts() -> ContractConfig {
    ContractConfig {
        package_id: object_id("0xa11ce"),
        idea_module: "idea".into(),
        market_module: "market".into(),
        seal_policy_module: "seal_policy".into(),
        delist_function: "delist_and_burn".into(),
        purchase_function: "purchase".into(),
        seal_approve_function: "seal_approve".into(),
        transfer_policy_id: object_id("0x7001"),
        task_package_id: object_id("0xb0b"),
        task_module: "task".into(),
        platform_id: object_id("0x91a7"),
    }
}

pub fn object_id(raw: &str) -> ObjectId {
    ObjectId::parse(raw).expect("object id")
}

pub fn clock() -> Arc<ManualClock> {
    let start = Utc
        .with_ymd_and_hms(2025, 1, 1, 12, 0, 0)
        .single()
        .expect("start time");
    Arc::new(ManualClock::new(start))
}

/// The 32 bytes behind an object id, used as the seal id of an idea.
pub fn id_bytes(id: &ObjectId) -> Vec<u8> {
    let hex = id.as_str().trim_start_matches("0x");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("hex"))
        .collect()
}

fn bytes_json(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| json!(b)).collect())
}

fn json_bytes(value: &Value) -> Vec<u8> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect()
        })
        .unwrap_or_default()
}

fn get_str(fields: &Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_u64(fields: &Map<String, Value>, key: &str) -> u64 {
    match fields.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
        _ => 0,
    }
}

fn set_u64(fields: &mut Map<String, Value>, key: &str, value: u64) {
    fields.insert(key.into(), json!(value.to_string()));
}

fn option_inner<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key)?.get("vec")?.as_array()?.first()
}

fn some(value: Value) -> Value {
    json!({ "vec": [value] })
}

fn none() -> Value {
    json!({ "vec": [] })
}

fn arg(call: &MoveCall, index: usize) -> Result<&Argument, String> {
    call.arguments
        .get(index)
        .ok_or_else(|| format!("missing argument {index}"))
}

fn pure(call: &MoveCall, index: usize) -> Result<&PureValue, String> {
    arg(call, index)?
        .as_pure()
        .ok_or_else(|| format!("argument {index} is not a pure value"))
}

fn string_arg(call: &MoveCall, index: usize) -> Result<String, String> {
    match pure(call, index)? {
        PureValue::String(s) => Ok(s.clone()),
        other => Err(format!("argument {index} is {other:?}, expected a string")),
    }
}

fn u64_arg(call: &MoveCall, index: usize) -> Result<u64, String> {
    match pure(call, index)? {
        PureValue::U64(n) => Ok(*n),
        other => Err(format!("argument {index} is {other:?}, expected u64")),
    }
}

fn bytes_arg(call: &MoveCall, index: usize) -> Result<Vec<u8>, String> {
    match pure(call, index)? {
        PureValue::Bytes(b) => Ok(b.clone()),
        other => Err(format!("argument {index} is {other:?}, expected bytes")),
    }
}

fn strings_arg(call: &MoveCall, index: usize) -> Result<Vec<String>, String> {
    match pure(call, index)? {
        PureValue::StringVector(v) => Ok(v.clone()),
        other => Err(format!("argument {index} is {other:?}, expected a string vector")),
    }
}

fn address_arg(call: &MoveCall, index: usize) -> Result<Address, String> {
    match pure(call, index)? {
        PureValue::Address(a) => Ok(a.clone()),
        other => Err(format!("argument {index} is {other:?}, expected an address")),
    }
}

fn id_arg(call: &MoveCall, index: usize) -> Result<ObjectId, String> {
    match pure(call, index)? {
        PureValue::Id(id) => Ok(id.clone()),
        other => Err(format!("argument {index} is {other:?}, expected an id")),
    }
}

fn object_arg(call: &MoveCall, index: usize) -> Result<ObjectId, String> {
    arg(call, index)?
        .as_object()
        .cloned()
        .ok_or_else(|| format!("argument {index} is not an object reference"))
}

fn coin_arg(tx: &TransactionDescription, call: &MoveCall, index: usize) -> Result<u64, String> {
    tx.split_amount(arg(call, index)?)
        .ok_or_else(|| format!("argument {index} is not a split coin"))
}

#[derive(Default)]
struct LedgerState {
    objects: BTreeMap<ObjectId, RawObject>,
    owners: HashMap<ObjectId, Address>,
    effects: HashMap<String, TransactionEffects>,
    executed: Vec<String>,
    reject_functions: HashSet<String>,
    failing_reads: HashSet<ObjectId>,
    failing_types: HashSet<String>,
}

impl LedgerState {
    fn fields_mut(
        &mut self,
        id: &ObjectId,
        expected_type: &str,
    ) -> Result<&mut Map<String, Value>, String> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| format!("object {id} does not exist"))?;
        ensure_type(expected_type, &object.object_type).map_err(|e| e.to_string())?;
        object
            .fields
            .as_object_mut()
            .ok_or_else(|| format!("object {id} has no fields"))
    }
}

pub struct FakeLedger {
    contracts: ContractConfig,
    state: Mutex<LedgerState>,
    next_id: AtomicU64,
    now_ms: AtomicU64,
}

struct Exec<'a> {
    state: &'a mut LedgerState,
    sender: &'a Address,
    tx: &'a TransactionDescription,
    changes: Vec<ObjectChange>,
    now: u64,
}

impl Exec<'_> {
    fn mutated(&mut self, id: &ObjectId, object_type: String) {
        self.changes.push(ObjectChange::Mutated {
            object_id: id.clone(),
            object_type,
        });
    }
}

impl FakeLedger {
    pub fn new(contracts: ContractConfig) -> Arc<Self> {
        let ledger = Self {
            contracts,
            state: Mutex::new(LedgerState::default()),
            next_id: AtomicU64::new(0x10_0000),
            now_ms: AtomicU64::new(START_MS),
        };
        let platform = RawObject {
            object_id: ledger.contracts.platform_id.clone(),
            object_type: ledger.contracts.task_struct_type("Platform"),
            fields: json!({
                "id": { "id": ledger.contracts.platform_id.as_str() },
                "task_ids": [],
                "total_tasks": "0",
                "total_completed": "0",
                "total_volume": "0",
                "platform_fee": "250",
                "fee_balance": "0"
            }),
        };
        ledger.insert(platform, None);
        Arc::new(ledger)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("ledger lock")
    }

    fn fresh_id(&self) -> ObjectId {
        object_id(&format!("0x{:x}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    pub fn insert(&self, object: RawObject, owner: Option<Address>) {
        let mut state = self.lock();
        if let Some(owner) = owner {
            state.owners.insert(object.object_id.clone(), owner);
        }
        state.objects.insert(object.object_id.clone(), object);
    }

    /// Makes the wallet refuse any transaction calling `function`.
    pub fn reject(&self, function: &str) {
        self.lock().reject_functions.insert(function.to_string());
    }

    pub fn fail_reads_of(&self, id: &ObjectId) {
        self.lock().failing_reads.insert(id.clone());
    }

    /// Fails reads of every object whose type is `struct_type`.
    pub fn fail_reads_of_type(&self, struct_type: &str) {
        self.lock().failing_types.insert(struct_type.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn raw(&self, id: &ObjectId) -> RawObject {
        self.lock().objects.get(id).cloned().expect("object exists")
    }

    pub fn task(&self, id: &ObjectId) -> Task {
        decode_task(&self.raw(id), &self.contracts.task_struct_type("Task")).expect("task decodes")
    }

    pub fn objects_of_type(&self, struct_type: &str) -> Vec<RawObject> {
        self.lock()
            .objects
            .values()
            .filter(|o| ensure_type(struct_type, &o.object_type).is_ok())
            .cloned()
            .collect()
    }

    /// Purchase approval owned by `buyer`, as a successful purchase leaves it.
    pub fn insert_approval(&self, buyer: &Address, seal_id: &SealId, quilt_id: &QuiltId) -> ObjectId {
        let id = self.fresh_id();
        self.insert(
            RawObject {
                object_id: id.clone(),
                object_type: self.contracts.purchase_approval_type(),
                fields: json!({
                    "id": { "id": id.as_str() },
                    "idea_id": none(),
                    "buyer": buyer.as_str(),
                    "seal_id": bytes_json(seal_id.as_bytes()),
                    "quilt_id": quilt_id.as_str()
                }),
            },
            Some(buyer.clone()),
        );
        id
    }

    /// Idea already carrying content and listed in `kiosk_id`.
    pub fn insert_listed_idea(
        &self,
        creator: &Address,
        price: u64,
        kiosk_id: &ObjectId,
        quilt_id: &QuiltId,
    ) -> ObjectId {
        let id = self.fresh_id();
        self.insert(
            RawObject {
                object_id: id.clone(),
                object_type: self.contracts.idea_type(),
                fields: json!({
                    "id": { "id": id.as_str() },
                    "name": "Orbit notebook",
                    "image_url": "https://img.example/orbit.png",
                    "tags": "Science",
                    "description": "notes on orbital mechanics",
                    "owner_name": "ana",
                    "num_download": "0",
                    "price": price.to_string(),
                    "quilt_id": quilt_id.as_str(),
                    "seal_id": bytes_json(&id_bytes(&id)),
                    "kiosk_id": kiosk_id.as_str(),
                    "creator_address": creator.as_str()
                }),
            },
            None,
        );
        id
    }

    /// Runs every call of `tx` as `sender`. Aborts roll back all changes and
    /// are recorded as a failed execution under the returned digest.
    pub fn execute(
        &self,
        sender: &Address,
        tx: &TransactionDescription,
    ) -> anyhow::Result<TransactionDigest> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(call) = tx
            .move_calls()
            .find(|call| state.reject_functions.contains(&call.function))
        {
            bail!("User rejected the request: {}", call.function);
        }
        let digest = TransactionDigest::new(format!(
            "Dig{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ))?;
        let snapshot = (state.objects.clone(), state.owners.clone());
        let mut exec = Exec {
            state: &mut *state,
            sender,
            tx,
            changes: Vec::new(),
            now: self.now_ms.fetch_add(1_000, Ordering::SeqCst),
        };
        let mut status = ExecutionStatus::Success;
        for call in tx.move_calls() {
            exec.state.executed.push(call.function.clone());
            if let Err(abort) = self.run(&mut exec, call) {
                status = ExecutionStatus::Failure {
                    error: format!("MoveAbort in {}: {abort}", call.target()),
                };
                break;
            }
        }
        let mut changes = exec.changes;
        if matches!(status, ExecutionStatus::Failure { .. }) {
            state.objects = snapshot.0;
            state.owners = snapshot.1;
            changes.clear();
        }
        state.effects.insert(
            digest.to_string(),
            TransactionEffects {
                digest: digest.clone(),
                status,
                object_changes: changes,
            },
        );
        Ok(digest)
    }

    fn create(
        &self,
        exec: &mut Exec<'_>,
        object_type: String,
        mut fields: Value,
        owner: Option<Address>,
    ) -> ObjectId {
        let id = self.fresh_id();
        fields["id"] = json!({ "id": id.as_str() });
        exec.state.objects.insert(
            id.clone(),
            RawObject {
                object_id: id.clone(),
                object_type: object_type.clone(),
                fields,
            },
        );
        if let Some(owner) = owner {
            exec.state.owners.insert(id.clone(), owner);
        }
        exec.changes.push(ObjectChange::Created {
            object_id: id.clone(),
            object_type,
        });
        id
    }

    fn run(&self, exec: &mut Exec<'_>, call: &MoveCall) -> Result<(), String> {
        let c = &self.contracts;
        if call.package == c.task_package_id && call.module == c.task_module {
            self.run_task(exec, call)
        } else if call.package == c.package_id && call.module == c.idea_module {
            self.run_idea(exec, call)
        } else if call.package == c.package_id && call.module == c.market_module {
            self.run_market(exec, call)
        } else if call.package == c.package_id && call.module == c.seal_policy_module {
            self.run_seal_policy(exec, call)
        } else {
            Err(format!("no such module {}::{}", call.package, call.module))
        }
    }

    fn run_task(&self, exec: &mut Exec<'_>, call: &MoveCall) -> Result<(), String> {
        let c = &self.contracts;
        let task_type = c.task_struct_type("Task");
        let profile_type = c.task_struct_type("UserProfile");
        let platform_type = c.task_struct_type("Platform");
        let now = exec.now;
        let sender = exec.sender.clone();

        match call.function.as_str() {
            "create_profile" => {
                let fields = json!({
                    "owner": sender.as_str(),
                    "name": string_arg(call, 0)?,
                    "bio": string_arg(call, 1)?,
                    "client_info": none(),
                    "freelancer_info": none(),
                    "created_at": now.to_string()
                });
                self.create(exec, profile_type, fields, Some(sender));
            }
            "register_as_client" | "register_as_freelancer" => {
                let profile_id = object_arg(call, 0)?;
                let (key, info) = if call.function == "register_as_client" {
                    (
                        "client_info",
                        json!({
                            "type": c.task_struct_type("ClientInfo"),
                            "fields": {
                                "jobs_posted": "0", "hire_rate": "0", "open_jobs": "0",
                                "total_spent": "0", "member_since": now.to_string()
                            }
                        }),
                    )
                } else {
                    (
                        "freelancer_info",
                        json!({
                            "type": c.task_struct_type("FreelancerInfo"),
                            "fields": {
                                "jobs_completed": "0", "success_rate": "0",
                                "total_earned": "0", "member_since": now.to_string()
                            }
                        }),
                    )
                };
                let profile = exec.state.fields_mut(&profile_id, &profile_type)?;
                if get_str(profile, "owner") != sender.as_str() {
                    return Err("sender does not own the profile".into());
                }
                if option_inner(profile, key).is_some() {
                    return Err(format!("{key} already registered"));
                }
                profile.insert(key.into(), some(info));
                exec.mutated(&profile_id, profile_type);
            }
            "create_fixed_price_task" | "create_hourly_task" => {
                let fixed = call.function == "create_fixed_price_task";
                let (offset, platform_id) = if fixed {
                    (1, Some(object_arg(call, 0)?))
                } else {
                    (0, None)
                };
                let rate = u64_arg(call, offset + 2)?;
                let escrow = coin_arg(exec.tx, call, offset + 8)?;
                let (fixed_price, hourly_rate) = if fixed {
                    (some(json!(rate.to_string())), none())
                } else {
                    (none(), some(json!(rate.to_string())))
                };
                let fields = json!({
                    "client": sender.as_str(),
                    "assigned_freelancer": none(),
                    "title": string_arg(call, offset)?,
                    "description": string_arg(call, offset + 1)?,
                    "hourly_rate": hourly_rate,
                    "fixed_price": fixed_price,
                    "duration": string_arg(call, offset + 3)?,
                    "experience_level": string_arg(call, offset + 4)?,
                    "skills": strings_arg(call, offset + 5)?,
                    "tools": strings_arg(call, offset + 6)?,
                    "posted_time": now.to_string(),
                    "proposals": [],
                    "payment_verified": true,
                    "escrow_balance": escrow.to_string(),
                    "location": string_arg(call, offset + 7)?,
                    "project_type": if fixed { "fixed" } else { "hourly" },
                    "status": 0,
                    "deadline": none(),
                    "client_info": {
                        "type": c.task_struct_type("ClientInfo"),
                        "fields": {
                            "jobs_posted": "1", "hire_rate": "0", "open_jobs": "1",
                            "total_spent": escrow.to_string(), "member_since": now.to_string()
                        }
                    }
                });
                let task_id = self.create(exec, task_type, fields, None);
                if let Some(platform_id) = platform_id {
                    let platform = exec.state.fields_mut(&platform_id, &platform_type)?;
                    if let Some(Value::Array(ids)) = platform.get_mut("task_ids") {
                        ids.push(json!(task_id.as_str()));
                    }
                    let total = get_u64(platform, "total_tasks");
                    set_u64(platform, "total_tasks", total + 1);
                    exec.mutated(&platform_id, platform_type);
                }
            }
            "submit_proposal" => {
                let task_id = object_arg(call, 0)?;
                let proposal = json!({
                    "type": c.task_struct_type("Proposal"),
                    "fields": {
                        "freelancer": sender.as_str(),
                        "bid_amount": u64_arg(call, 1)?.to_string(),
                        "delivery_time": u64_arg(call, 2)?.to_string(),
                        "cover_letter": string_arg(call, 3)?,
                        "proposed_at": now.to_string()
                    }
                });
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                if get_u64(task, "status") != 0 {
                    return Err("task is not open".into());
                }
                if get_str(task, "client") == sender.as_str() {
                    return Err("client cannot propose on own task".into());
                }
                let proposals = task
                    .get_mut("proposals")
                    .and_then(Value::as_array_mut)
                    .ok_or("task has no proposal list")?;
                if proposals
                    .iter()
                    .any(|p| p["fields"]["freelancer"] == sender.as_str())
                {
                    return Err("freelancer already proposed".into());
                }
                proposals.push(proposal);
                exec.mutated(&task_id, task_type);
            }
            "assign_task" => {
                let task_id = object_arg(call, 0)?;
                let freelancer = address_arg(call, 1)?;
                let deadline = now + u64_arg(call, 2)? * DAY_MS;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                if get_str(task, "client") != sender.as_str() {
                    return Err("only the client can assign".into());
                }
                if get_u64(task, "status") != 0 {
                    return Err("task is not open".into());
                }
                let proposed = task
                    .get("proposals")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .any(|p| p["fields"]["freelancer"] == freelancer.as_str())
                    })
                    .unwrap_or(false);
                if !proposed {
                    return Err("freelancer has no proposal".into());
                }
                task.insert("assigned_freelancer".into(), some(json!(freelancer.as_str())));
                task.insert("deadline".into(), some(json!(deadline.to_string())));
                task.insert("status".into(), json!(1));
                exec.mutated(&task_id, task_type);
            }
            "start_task" => {
                let task_id = object_arg(call, 0)?;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                ensure_freelancer(task, &sender)?;
                if get_u64(task, "status") != 1 {
                    return Err("task is not assigned".into());
                }
                task.insert("status".into(), json!(2));
                exec.mutated(&task_id, task_type);
            }
            "submit_work" => {
                let task_id = object_arg(call, 0)?;
                let quilt_id = string_arg(call, 1)?;
                let seal_id = bytes_arg(call, 2)?;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                ensure_freelancer(task, &sender)?;
                if get_u64(task, "status") != 2 {
                    return Err("task is not in progress".into());
                }
                task.insert("status".into(), json!(3));
                let client = Address::parse(&get_str(task, "client")).map_err(|e| e.to_string())?;
                exec.mutated(&task_id, task_type);
                let fields = json!({
                    "task_id": task_id.as_str(),
                    "quilt_id": quilt_id,
                    "seal_id": bytes_json(&seal_id)
                });
                self.create(exec, c.task_struct_type("TaskSubmission"), fields, Some(client));
            }
            "complete_task" => {
                let task_id = object_arg(call, 0)?;
                let platform_id = object_arg(call, 1)?;
                let profile_id = object_arg(call, 2)?;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                if get_str(task, "client") != sender.as_str() {
                    return Err("only the client can complete".into());
                }
                if get_u64(task, "status") != 3 {
                    return Err("work has not been submitted".into());
                }
                let freelancer = option_inner(task, "assigned_freelancer")
                    .and_then(Value::as_str)
                    .ok_or("task has no freelancer")?
                    .to_string();
                let escrow = get_u64(task, "escrow_balance");
                task.insert("status".into(), json!(4));
                set_u64(task, "escrow_balance", 0);
                exec.mutated(&task_id, task_type);

                let profile = exec.state.fields_mut(&profile_id, &profile_type)?;
                if get_str(profile, "owner") != freelancer {
                    return Err("profile does not belong to the assigned freelancer".into());
                }
                let info = profile
                    .get_mut("freelancer_info")
                    .and_then(|v| v.get_mut("vec"))
                    .and_then(|v| v.get_mut(0))
                    .and_then(|v| v.get_mut("fields"))
                    .and_then(Value::as_object_mut)
                    .ok_or("profile is not a freelancer")?;
                let earned = get_u64(info, "total_earned");
                let completed = get_u64(info, "jobs_completed");
                set_u64(info, "total_earned", earned + escrow);
                set_u64(info, "jobs_completed", completed + 1);
                exec.mutated(&profile_id, profile_type);

                let platform = exec.state.fields_mut(&platform_id, &platform_type)?;
                let done = get_u64(platform, "total_completed");
                let volume = get_u64(platform, "total_volume");
                set_u64(platform, "total_completed", done + 1);
                set_u64(platform, "total_volume", volume + escrow);
                exec.mutated(&platform_id, platform_type);
            }
            "raise_dispute" => {
                let task_id = object_arg(call, 0)?;
                string_arg(call, 1)?;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                let status = get_u64(task, "status");
                if status != 2 && status != 3 {
                    return Err("task cannot be disputed in this state".into());
                }
                let is_client = get_str(task, "client") == sender.as_str();
                if !is_client && ensure_freelancer(task, &sender).is_err() {
                    return Err("only the parties can dispute".into());
                }
                task.insert("status".into(), json!(5));
                exec.mutated(&task_id, task_type);
            }
            "cancel_task" => {
                let task_id = object_arg(call, 0)?;
                let task = exec.state.fields_mut(&task_id, &task_type)?;
                if get_str(task, "client") != sender.as_str() {
                    return Err("only the client can cancel".into());
                }
                if get_u64(task, "status") != 0 {
                    return Err("only open tasks can be cancelled".into());
                }
                task.insert("status".into(), json!(6));
                set_u64(task, "escrow_balance", 0);
                exec.mutated(&task_id, task_type);
            }
            other => return Err(format!("unknown task function {other}")),
        }
        Ok(())
    }

    fn run_idea(&self, exec: &mut Exec<'_>, call: &MoveCall) -> Result<(), String> {
        let idea_type = self.contracts.idea_type();
        let sender = exec.sender.clone();
        match call.function.as_str() {
            "create_idea" => {
                if !matches!(arg(call, 0)?, Argument::Random) {
                    return Err("first argument must be the randomness object".into());
                }
                let image = bytes_arg(call, 2)?;
                let fields = json!({
                    "name": string_arg(call, 1)?,
                    "image_url": String::from_utf8_lossy(&image),
                    "tags": string_arg(call, 3)?,
                    "description": string_arg(call, 4)?,
                    "owner_name": string_arg(call, 5)?,
                    "price": u64_arg(call, 6)?.to_string(),
                    "num_download": u64_arg(call, 7)?.to_string(),
                    "quilt_id": "",
                    "creator_address": sender.as_str()
                });
                let id = self.create(exec, idea_type.clone(), fields, Some(sender));
                let idea = exec.state.fields_mut(&id, &idea_type)?;
                idea.insert("seal_id".into(), bytes_json(&id_bytes(&id)));
            }
            "set_quilt_id" => {
                let idea_id = object_arg(call, 0)?;
                let quilt_id = string_arg(call, 1)?;
                let idea = exec.state.fields_mut(&idea_id, &idea_type)?;
                if get_str(idea, "creator_address") != sender.as_str() {
                    return Err("only the creator can attach content".into());
                }
                idea.insert("quilt_id".into(), json!(quilt_id));
                exec.mutated(&idea_id, idea_type);
            }
            other => return Err(format!("unknown idea function {other}")),
        }
        Ok(())
    }

    fn run_market(&self, exec: &mut Exec<'_>, call: &MoveCall) -> Result<(), String> {
        let c = &self.contracts;
        let idea_type = c.idea_type();
        let sender = exec.sender.clone();
        match call.function.as_str() {
            "place_and_list" => {
                let idea_id = object_arg(call, 0)?;
                let kiosk_id = object_arg(call, 1)?;
                object_arg(call, 2)?;
                let idea = exec.state.fields_mut(&idea_id, &idea_type)?;
                if get_str(idea, "creator_address") != sender.as_str() {
                    return Err("only the creator can list".into());
                }
                idea.insert("kiosk_id".into(), json!(kiosk_id.as_str()));
                exec.state.owners.remove(&idea_id);
                exec.mutated(&idea_id, idea_type);
            }
            function if function == c.purchase_function => {
                let idea_id = id_arg(call, 0)?;
                let paid = coin_arg(exec.tx, call, 1)?;
                let kiosk_id = object_arg(call, 2)?;
                if object_arg(call, 3)? != c.transfer_policy_id {
                    return Err("wrong transfer policy".into());
                }
                let idea = exec.state.fields_mut(&idea_id, &idea_type)?;
                if get_str(idea, "kiosk_id") != kiosk_id.as_str() {
                    return Err("idea is not listed in this kiosk".into());
                }
                if paid < get_u64(idea, "price") {
                    return Err("insufficient payment".into());
                }
                let quilt_id = get_str(idea, "quilt_id");
                if quilt_id.is_empty() {
                    return Err("idea has no content".into());
                }
                let seal_id = idea.get("seal_id").cloned().unwrap_or_else(|| json!([]));
                let downloads = get_u64(idea, "num_download");
                set_u64(idea, "num_download", downloads + 1);
                exec.mutated(&idea_id, idea_type);
                let fields = json!({
                    "idea_id": some(json!(idea_id.as_str())),
                    "buyer": sender.as_str(),
                    "seal_id": seal_id,
                    "quilt_id": quilt_id
                });
                self.create(exec, c.purchase_approval_type(), fields, Some(sender));
            }
            other => return Err(format!("unsupported market function {other}")),
        }
        Ok(())
    }

    fn run_seal_policy(&self, exec: &mut Exec<'_>, call: &MoveCall) -> Result<(), String> {
        if call.function != self.contracts.seal_approve_function {
            return Err(format!("unknown policy function {}", call.function));
        }
        let seal_id = bytes_arg(call, 0)?;
        let approval_id = object_arg(call, 1)?;
        let approval = exec
            .state
            .fields_mut(&approval_id, &self.contracts.purchase_approval_type())?;
        if get_str(approval, "buyer") != exec.sender.as_str() {
            return Err("sender is not the buyer".into());
        }
        if approval.get("seal_id").map(json_bytes) != Some(seal_id) {
            return Err("seal id does not match the approval".into());
        }
        Ok(())
    }
}

fn ensure_freelancer(task: &Map<String, Value>, sender: &Address) -> Result<(), String> {
    match option_inner(task, "assigned_freelancer").and_then(Value::as_str) {
        Some(freelancer) if freelancer == sender.as_str() => Ok(()),
        _ => Err("sender is not the assigned freelancer".into()),
    }
}

#[async_trait]
impl ChainReader for FakeLedger {
    async fn get_object(&self, id: &ObjectId) -> Result<RawObject, ChainError> {
        let state = self.lock();
        let failing_type = state.objects.get(id).is_some_and(|o| {
            state
                .failing_types
                .iter()
                .any(|t| ensure_type(t, &o.object_type).is_ok())
        });
        if failing_type || state.failing_reads.contains(id) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "injected read failure".into(),
            });
        }
        state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(id.clone()))
    }

    async fn get_owned_objects(
        &self,
        owner: &Address,
        struct_type: &str,
    ) -> Result<Vec<RawObject>, ChainError> {
        let state = self.lock();
        Ok(state
            .objects
            .values()
            .filter(|o| state.owners.get(&o.object_id) == Some(owner))
            .filter(|o| ensure_type(struct_type, &o.object_type).is_ok())
            .cloned()
            .collect())
    }

    async fn wait_for_transaction(
        &self,
        digest: &TransactionDigest,
    ) -> Result<TransactionEffects, ChainError> {
        self.lock()
            .effects
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| ChainError::EffectsTimeout {
                digest: digest.to_string(),
                polls: 0,
            })
    }
}

/// Wallet holding one ed25519 key and executing against a `FakeLedger`.
pub struct FakeWallet {
    ledger: Arc<FakeLedger>,
    key: SigningKey,
    account: Address,
    refuse_messages: AtomicBool,
}

impl FakeWallet {
    pub fn new(ledger: Arc<FakeLedger>) -> Arc<Self> {
        let key = SigningKey::generate(&mut OsRng);
        let account = address_from_public_key(&key.verifying_key()).expect("address");
        Arc::new(Self {
            ledger,
            key,
            account,
            refuse_messages: AtomicBool::new(false),
        })
    }

    pub fn account(&self) -> Address {
        self.account.clone()
    }

    pub fn refuse_personal_messages(&self) {
        self.refuse_messages.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    fn address(&self) -> Option<Address> {
        Some(self.account.clone())
    }

    async fn sign_and_execute(&self, tx: &TransactionDescription) -> anyhow::Result<TransactionDigest> {
        self.ledger.execute(&self.account, tx)
    }

    async fn sign_personal_message(&self, message: &[u8]) -> anyhow::Result<PersonalSignature> {
        if self.refuse_messages.load(Ordering::SeqCst) {
            bail!("User rejected the message signature");
        }
        Ok(PersonalSignature::sign(&self.key, message))
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, Address)>>,
    fail_reads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn owner_of(&self, quilt_id: &QuiltId) -> Option<Address> {
        self.blobs
            .lock()
            .expect("blob lock")
            .get(quilt_id.as_str())
            .map(|(_, owner)| owner.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob lock").len()
    }

    /// Overwrites the content of `to` with the content of `from`.
    pub fn copy(&self, from: &QuiltId, to: &QuiltId) {
        let mut blobs = self.blobs.lock().expect("blob lock");
        let data = blobs.get(from.as_str()).map(|(data, _)| data.clone()).expect("source blob");
        if let Some(entry) = blobs.get_mut(to.as_str()) {
            entry.0 = data;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, data: Vec<u8>, owner: &Address) -> Result<QuiltId, BlobStoreError> {
        let mut blobs = self.blobs.lock().expect("blob lock");
        let id = format!("quilt-{}", blobs.len() + 1);
        blobs.insert(id.clone(), (data, owner.clone()));
        QuiltId::new(id).map_err(|_| BlobStoreError::MissingQuiltId)
    }

    async fn read(&self, quilt_id: &QuiltId) -> Result<Vec<u8>, BlobStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Unavailable { status: 503 });
        }
        self.blobs
            .lock()
            .expect("blob lock")
            .get(quilt_id.as_str())
            .map(|(data, _)| data.clone())
            .ok_or(BlobStoreError::Unavailable { status: 404 })
    }
}

#[derive(Default)]
pub struct MemoryProjects {
    projects: Mutex<Vec<Project>>,
    fail_with: Mutex<Option<String>>,
}

impl MemoryProjects {
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().expect("projects lock") = Some(message.to_string());
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.lock().expect("projects lock").clone()
    }
}

#[async_trait]
impl ProjectSink for MemoryProjects {
    async fn create_project(&self, draft: &ProjectDraft) -> anyhow::Result<Project> {
        if let Some(message) = self.fail_with.lock().expect("projects lock").clone() {
            return Err(anyhow!(message));
        }
        let mut projects = self.projects.lock().expect("projects lock");
        let project = Project {
            id: format!("project-{}", projects.len() + 1),
            name: draft.name.clone(),
            idea_description: draft.idea_description.clone(),
            prototype_code: Some(draft.prototype_code.clone()),
            ..Project::default()
        };
        projects.push(project.clone());
        Ok(project)
    }
}

/// Backend market registry that seals uploaded projects the way the real
/// backend does: under the marketplace package with the idea id as seal id.
pub struct FakeRegistry {
    blobs: Arc<MemoryBlobStore>,
    key_server: Arc<dyn KeyServer>,
    package_id: ObjectId,
    listings: Mutex<Vec<(Address, ObjectId, ObjectId)>>,
    fail_with: Mutex<Option<String>>,
}

impl FakeRegistry {
    pub fn new(
        blobs: Arc<MemoryBlobStore>,
        key_server: Arc<dyn KeyServer>,
        package_id: ObjectId,
    ) -> Arc<Self> {
        Arc::new(Self {
            blobs,
            key_server,
            package_id,
            listings: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        })
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().expect("registry lock") = Some(message.to_string());
    }

    pub fn listings(&self) -> Vec<(Address, ObjectId, ObjectId)> {
        self.listings.lock().expect("registry lock").clone()
    }

    /// Seals `draft` for `idea_id` and stores it, returning the quilt id.
    pub async fn seal_document(
        &self,
        draft: &ProjectDraft,
        idea_id: &ObjectId,
        owner: &Address,
    ) -> anyhow::Result<QuiltId> {
        let public_key = self.key_server.public_key().await?;
        let seal_id = SealId::new(id_bytes(idea_id))?;
        let envelope =
            EncryptedObject::seal(&public_key, &self.package_id, &seal_id, &draft.to_document()?)?;
        Ok(self.blobs.store(envelope.to_bytes()?, owner).await?)
    }
}

#[async_trait]
impl MarketRegistry for FakeRegistry {
    async fn upload_project(
        &self,
        project: &Project,
        idea_id: &ObjectId,
        owner: &Address,
    ) -> anyhow::Result<QuiltId> {
        if let Some(message) = self.fail_with.lock().expect("registry lock").clone() {
            bail!(message);
        }
        self.seal_document(&ProjectDraft::from(project), idea_id, owner)
            .await
    }

    async fn register_listing(
        &self,
        owner: &Address,
        kiosk_id: &ObjectId,
        idea_id: &ObjectId,
    ) -> anyhow::Result<MarketEntry> {
        self.listings
            .lock()
            .expect("registry lock")
            .push((owner.clone(), kiosk_id.clone(), idea_id.clone()));
        Ok(MarketEntry {
            owner: owner.clone(),
            kiosks: vec![KioskListing {
                kid: kiosk_id.clone(),
                idea_ids: vec![idea_id.clone()],
            }],
        })
    }
}

use crate::{
    address, non_empty, object_id, positive, Argument, BuildError, ContractConfig, MoveCall,
    TransactionDescription,
};

/// Fields shared by fixed-price and hourly task postings.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    /// Fixed price or hourly rate, depending on the builder used.
    pub rate: u64,
    pub duration: String,
    pub experience_level: String,
    pub skills: Vec<String>,
    pub tools: Vec<String>,
    pub location: String,
    /// Amount moved into escrow when the task is created.
    pub payment: u64,
}

fn task_call(config: &ContractConfig, function: &str, arguments: Vec<Argument>) -> MoveCall {
    MoveCall {
        package: config.task_package_id.clone(),
        module: config.task_module.clone(),
        function: function.into(),
        arguments,
    }
}

fn single_call(call: MoveCall) -> TransactionDescription {
    let mut tx = TransactionDescription::new();
    tx.move_call(call);
    tx
}

pub fn create_profile(
    config: &ContractConfig,
    name: &str,
    bio: &str,
) -> Result<TransactionDescription, BuildError> {
    let name = non_empty("profile name", name)?;
    Ok(single_call(task_call(
        config,
        "create_profile",
        vec![Argument::string(name), Argument::string(bio), Argument::Clock],
    )))
}

pub fn register_as_client(
    config: &ContractConfig,
    profile_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let profile_id = object_id("profile id", profile_id)?;
    Ok(single_call(task_call(
        config,
        "register_as_client",
        vec![Argument::object(profile_id), Argument::Clock],
    )))
}

pub fn register_as_freelancer(
    config: &ContractConfig,
    profile_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let profile_id = object_id("profile id", profile_id)?;
    Ok(single_call(task_call(
        config,
        "register_as_freelancer",
        vec![Argument::object(profile_id), Argument::Clock],
    )))
}

struct ValidatedTask {
    title: String,
    rate: u64,
    payment: u64,
}

fn validate_task(task: &NewTask, rate_field: &'static str) -> Result<ValidatedTask, BuildError> {
    Ok(ValidatedTask {
        title: non_empty("task title", &task.title)?,
        rate: positive(rate_field, task.rate)?,
        payment: positive("payment", task.payment)?,
    })
}

pub fn create_fixed_price_task(
    config: &ContractConfig,
    task: &NewTask,
) -> Result<TransactionDescription, BuildError> {
    let valid = validate_task(task, "fixed price")?;

    let mut tx = TransactionDescription::new();
    let coin = tx.split_gas(valid.payment);
    tx.move_call(task_call(
        config,
        "create_fixed_price_task",
        vec![
            Argument::object(config.platform_id.clone()),
            Argument::string(valid.title),
            Argument::string(task.description.clone()),
            Argument::u64(valid.rate),
            Argument::string(task.duration.clone()),
            Argument::string(task.experience_level.clone()),
            Argument::strings(task.skills.clone()),
            Argument::strings(task.tools.clone()),
            Argument::string(task.location.clone()),
            coin,
            Argument::Clock,
        ],
    ));
    Ok(tx)
}

/// Hourly postings do not take the platform object.
pub fn create_hourly_task(
    config: &ContractConfig,
    task: &NewTask,
) -> Result<TransactionDescription, BuildError> {
    let valid = validate_task(task, "hourly rate")?;

    let mut tx = TransactionDescription::new();
    let coin = tx.split_gas(valid.payment);
    tx.move_call(task_call(
        config,
        "create_hourly_task",
        vec![
            Argument::string(valid.title),
            Argument::string(task.description.clone()),
            Argument::u64(valid.rate),
            Argument::string(task.duration.clone()),
            Argument::string(task.experience_level.clone()),
            Argument::strings(task.skills.clone()),
            Argument::strings(task.tools.clone()),
            Argument::string(task.location.clone()),
            coin,
            Argument::Clock,
        ],
    ));
    Ok(tx)
}

pub fn submit_proposal(
    config: &ContractConfig,
    task_id: &str,
    bid_amount: u64,
    delivery_days: u64,
    cover_letter: &str,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    let bid_amount = positive("bid amount", bid_amount)?;
    let delivery_days = positive("delivery time", delivery_days)?;
    Ok(single_call(task_call(
        config,
        "submit_proposal",
        vec![
            Argument::object(task_id),
            Argument::u64(bid_amount),
            Argument::u64(delivery_days),
            Argument::string(cover_letter),
            Argument::Clock,
        ],
    )))
}

pub fn assign_task(
    config: &ContractConfig,
    task_id: &str,
    freelancer: &str,
    deadline_days: u64,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    let freelancer = address("freelancer address", freelancer)?;
    Ok(single_call(task_call(
        config,
        "assign_task",
        vec![
            Argument::object(task_id),
            Argument::address(freelancer),
            Argument::u64(deadline_days),
            Argument::Clock,
        ],
    )))
}

pub fn start_task(
    config: &ContractConfig,
    task_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    Ok(single_call(task_call(
        config,
        "start_task",
        vec![Argument::object(task_id)],
    )))
}

pub fn submit_work(
    config: &ContractConfig,
    task_id: &str,
    quilt_id: &str,
    seal_id: &[u8],
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    let quilt_id = non_empty("quilt id", quilt_id)?;
    if seal_id.is_empty() {
        return Err(BuildError::EmptyKeyId);
    }
    Ok(single_call(task_call(
        config,
        "submit_work",
        vec![
            Argument::object(task_id),
            Argument::string(quilt_id),
            Argument::bytes(seal_id),
        ],
    )))
}

/// `profile_id` is the assigned freelancer's profile, credited with the
/// released escrow.
pub fn complete_task(
    config: &ContractConfig,
    task_id: &str,
    profile_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    let profile_id = object_id("profile id", profile_id)?;
    Ok(single_call(task_call(
        config,
        "complete_task",
        vec![
            Argument::object(task_id),
            Argument::object(config.platform_id.clone()),
            Argument::object(profile_id),
            Argument::Clock,
        ],
    )))
}

pub fn raise_dispute(
    config: &ContractConfig,
    task_id: &str,
    reason: &str,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    let reason = non_empty("dispute reason", reason)?;
    Ok(single_call(task_call(
        config,
        "raise_dispute",
        vec![Argument::object(task_id), Argument::string(reason)],
    )))
}

pub fn cancel_task(
    config: &ContractConfig,
    task_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let task_id = object_id("task id", task_id)?;
    Ok(single_call(task_call(
        config,
        "cancel_task",
        vec![Argument::object(task_id)],
    )))
}

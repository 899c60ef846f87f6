use shared::domain::SealId;

use crate::{
    address, object_id, Argument, BuildError, ContractConfig, MoveCall, PureValue,
    TransactionDescription,
};

/// Policy check proving the sender holds the purchase approval for `seal_id`.
pub fn seal_approve(
    config: &ContractConfig,
    sender: &str,
    seal_id: &[u8],
    approval_purchase_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let sender = address("sender address", sender)?;
    if seal_id.is_empty() {
        return Err(BuildError::EmptyKeyId);
    }
    let approval_id = object_id("approval purchase id", approval_purchase_id)?;

    let mut tx = TransactionDescription::new().with_sender(sender);
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.seal_policy_module.clone(),
        function: config.seal_approve_function.clone(),
        arguments: vec![Argument::bytes(seal_id), Argument::object(approval_id)],
    });
    Ok(tx)
}

/// A `seal_approve` call recovered from transaction-kind bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealApproval {
    pub seal_id: SealId,
    pub approval_id: shared::domain::ObjectId,
}

/// Finds the `seal_approve` call in policy bytes, checking it targets the
/// configured package and module.
pub fn find_seal_approval(
    config: &ContractConfig,
    kind_bytes: &[u8],
) -> Result<Option<SealApproval>, BuildError> {
    let commands = TransactionDescription::commands_from_kind_bytes(kind_bytes)?;
    let tx = TransactionDescription {
        commands,
        ..TransactionDescription::default()
    };
    let approval = tx
        .move_calls()
        .filter(|call| {
            call.package == config.package_id
                && call.module == config.seal_policy_module
                && call.function == config.seal_approve_function
        })
        .find_map(|call| {
            let Some(PureValue::Bytes(seal)) = call.arguments.first().and_then(Argument::as_pure)
            else {
                return None;
            };
            let approval_id = call.arguments.get(1).and_then(Argument::as_object)?;
            Some(SealApproval {
                seal_id: SealId::new(seal.clone()).ok()?,
                approval_id: approval_id.clone(),
            })
        });
    Ok(approval)
}

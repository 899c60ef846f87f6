use crate::{
    address, object_id, positive, Argument, BuildError, ContractConfig, MoveCall,
    TransactionDescription, DEFAULT_GAS_BUDGET,
};

#[derive(Debug, Clone)]
pub struct KioskPlacement {
    pub idea_id: String,
    pub kiosk_id: String,
    pub kiosk_owner_cap_id: String,
}

#[derive(Debug, Clone)]
pub struct PurchaseIdea {
    pub price: u64,
    pub idea_id: String,
    pub kiosk_id: String,
}

pub fn place_and_list(
    config: &ContractConfig,
    placement: &KioskPlacement,
) -> Result<TransactionDescription, BuildError> {
    let idea_id = object_id("idea id", &placement.idea_id)?;
    let kiosk_id = object_id("kiosk id", &placement.kiosk_id)?;
    let cap_id = object_id("kiosk owner cap id", &placement.kiosk_owner_cap_id)?;

    let mut tx = TransactionDescription::new().with_gas_budget(DEFAULT_GAS_BUDGET);
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.market_module.clone(),
        function: "place_and_list".into(),
        arguments: vec![
            Argument::object(idea_id),
            Argument::object(kiosk_id),
            Argument::object(cap_id),
        ],
    });
    Ok(tx)
}

/// Takes the idea out of the kiosk and destroys it.
pub fn delist_and_burn(
    config: &ContractConfig,
    placement: &KioskPlacement,
) -> Result<TransactionDescription, BuildError> {
    // The contract takes the idea id by value, not as an object reference.
    let idea_id = address("idea id", &placement.idea_id)?;
    let kiosk_id = object_id("kiosk id", &placement.kiosk_id)?;
    let cap_id = object_id("kiosk owner cap id", &placement.kiosk_owner_cap_id)?;

    let mut tx = TransactionDescription::new();
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.market_module.clone(),
        function: config.delist_function.clone(),
        arguments: vec![
            Argument::address(idea_id),
            Argument::object(kiosk_id),
            Argument::object(cap_id),
        ],
    });
    Ok(tx)
}

pub fn purchase(
    config: &ContractConfig,
    order: &PurchaseIdea,
) -> Result<TransactionDescription, BuildError> {
    let price = positive("price", order.price)?;
    let idea_id = object_id("idea id", &order.idea_id)?;
    let kiosk_id = object_id("kiosk id", &order.kiosk_id)?;

    let mut tx = TransactionDescription::new();
    let coin = tx.split_gas(price);
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.market_module.clone(),
        function: config.purchase_function.clone(),
        arguments: vec![
            Argument::id(idea_id),
            coin,
            Argument::object(kiosk_id),
            Argument::object(config.transfer_policy_id.clone()),
        ],
    });
    Ok(tx)
}

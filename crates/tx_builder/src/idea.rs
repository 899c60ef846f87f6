use crate::{
    non_empty, object_id, positive, Argument, BuildError, ContractConfig, MoveCall,
    TransactionDescription, DEFAULT_GAS_BUDGET,
};

#[derive(Debug, Clone)]
pub struct CreateIdea {
    pub title: String,
    pub description: String,
    pub price: u64,
    pub category: String,
    pub creator: String,
    pub image: String,
    pub downloads: u64,
}

pub fn create_idea(
    config: &ContractConfig,
    idea: &CreateIdea,
) -> Result<TransactionDescription, BuildError> {
    let title = non_empty("title", &idea.title)?;
    let category = non_empty("category", &idea.category)?;
    let creator = non_empty("creator", &idea.creator)?;
    let price = positive("price", idea.price)?;

    let mut tx = TransactionDescription::new().with_gas_budget(DEFAULT_GAS_BUDGET);
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.idea_module.clone(),
        function: "create_idea".into(),
        arguments: vec![
            Argument::Random,
            Argument::string(title),
            Argument::bytes(idea.image.as_bytes()),
            Argument::string(category),
            Argument::string(idea.description.clone()),
            Argument::string(creator),
            Argument::u64(price),
            Argument::u64(idea.downloads),
            Argument::string("start"),
            Argument::string("update"),
        ],
    });
    Ok(tx)
}

pub fn set_quilt_id(
    config: &ContractConfig,
    idea_id: &str,
    quilt_id: &str,
) -> Result<TransactionDescription, BuildError> {
    let idea_id = object_id("idea id", idea_id)?;
    let quilt_id = non_empty("quilt id", quilt_id)?;

    let mut tx = TransactionDescription::new().with_gas_budget(DEFAULT_GAS_BUDGET);
    tx.move_call(MoveCall {
        package: config.package_id.clone(),
        module: config.idea_module.clone(),
        function: "set_quilt_id".into(),
        arguments: vec![Argument::object(idea_id), Argument::string(quilt_id)],
    });
    Ok(tx)
}

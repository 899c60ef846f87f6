use super::*;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use tokio::{net::TcpListener, sync::Mutex};

const IDEA_TYPE: &str = "0x0000000000000000000000000000000000000000000000000000000000000abc::idea::Idea";

#[derive(Clone, Default)]
struct RpcState {
    tx_polls: Arc<Mutex<u32>>,
    visible_after: u32,
    execution_error: Option<String>,
    methods: Arc<Mutex<Vec<String>>>,
}

async fn handle_rpc(State(state): State<RpcState>, Json(body): Json<Value>) -> Json<Value> {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    state.methods.lock().await.push(method.clone());
    let id = body["id"].clone();
    let result = match method.as_str() {
        "sui_getObject" => {
            let object_id = body["params"][0].as_str().unwrap_or_default();
            if object_id.ends_with("dead") {
                json!({ "error": { "code": "notExists", "object_id": object_id } })
            } else {
                json!({
                    "data": {
                        "objectId": object_id,
                        "content": {
                            "dataType": "moveObject",
                            "type": IDEA_TYPE,
                            "fields": { "name": "Orbit" }
                        }
                    }
                })
            }
        }
        "suix_getOwnedObjects" => {
            let cursor = body["params"][2].clone();
            if cursor.is_null() {
                json!({
                    "data": [{ "data": {
                        "objectId": "0x1",
                        "content": { "dataType": "moveObject", "type": IDEA_TYPE, "fields": {} }
                    }}],
                    "nextCursor": "page-2",
                    "hasNextPage": true
                })
            } else {
                json!({
                    "data": [{ "data": {
                        "objectId": "0x2",
                        "content": { "dataType": "moveObject", "type": IDEA_TYPE, "fields": {} }
                    }}],
                    "nextCursor": null,
                    "hasNextPage": false
                })
            }
        }
        "sui_getTransactionBlock" => {
            let mut polls = state.tx_polls.lock().await;
            *polls += 1;
            if *polls <= state.visible_after {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32602, "message": "Could not find the referenced transaction" }
                }));
            }
            let status = match &state.execution_error {
                Some(error) => json!({ "status": "failure", "error": error }),
                None => json!({ "status": "success" }),
            };
            json!({
                "digest": body["params"][0],
                "effects": { "status": status },
                "objectChanges": [
                    { "type": "mutated", "objectId": "0x5", "objectType": "0x2::coin::Coin<0x2::sui::SUI>" },
                    { "type": "published", "packageId": "0x9" },
                    { "type": "created", "objectId": "0x77", "objectType": IDEA_TYPE }
                ]
            })
        }
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" }
            }))
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn spawn_rpc(state: RpcState) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route("/", post(handle_rpc)).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/"))
}

fn digest() -> TransactionDigest {
    TransactionDigest::new("8Lp4Xh2").expect("digest")
}

#[tokio::test]
async fn get_object_returns_raw_fields() {
    let url = spawn_rpc(RpcState::default()).await.expect("server");
    let reader = RpcChainReader::new(url);
    let id = ObjectId::parse("0x42").expect("id");

    let object = reader.get_object(&id).await.expect("object");
    assert_eq!(object.object_id, id);
    assert_eq!(object.object_type, IDEA_TYPE);
    assert_eq!(object.fields["name"], "Orbit");
}

#[tokio::test]
async fn missing_object_is_not_found() {
    let url = spawn_rpc(RpcState::default()).await.expect("server");
    let reader = RpcChainReader::new(url);
    let id = ObjectId::parse("0xdead").expect("id");

    let err = reader.get_object(&id).await.expect_err("must fail");
    assert!(matches!(err, ChainError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn owned_objects_follow_pagination() {
    let url = spawn_rpc(RpcState::default()).await.expect("server");
    let reader = RpcChainReader::new(url);
    let owner = Address::parse("0xa").expect("owner");

    let objects = reader
        .get_owned_objects(&owner, IDEA_TYPE)
        .await
        .expect("objects");
    let ids: Vec<_> = objects.iter().map(|o| o.object_id.clone()).collect();
    assert_eq!(
        ids,
        vec![
            ObjectId::parse("0x1").expect("id"),
            ObjectId::parse("0x2").expect("id")
        ]
    );
}

#[tokio::test]
async fn wait_for_transaction_polls_until_visible() {
    let state = RpcState {
        visible_after: 2,
        ..RpcState::default()
    };
    let polls = state.tx_polls.clone();
    let url = spawn_rpc(state).await.expect("server");
    let reader = RpcChainReader::new(url).with_polling(Duration::from_millis(5), 5);

    let effects = reader
        .wait_for_transaction(&digest())
        .await
        .expect("effects")
        .ensure_success()
        .expect("success");
    assert_eq!(*polls.lock().await, 3);
    assert_eq!(effects.object_changes.len(), 2);
    assert_eq!(
        effects.find_created(IDEA_TYPE),
        Some(&ObjectId::parse("0x77").expect("id"))
    );
}

#[tokio::test]
async fn wait_for_transaction_gives_up_after_bounded_polls() {
    let state = RpcState {
        visible_after: 100,
        ..RpcState::default()
    };
    let polls = state.tx_polls.clone();
    let url = spawn_rpc(state).await.expect("server");
    let reader = RpcChainReader::new(url).with_polling(Duration::from_millis(1), 3);

    let err = reader
        .wait_for_transaction(&digest())
        .await
        .expect_err("must time out");
    assert!(matches!(err, ChainError::EffectsTimeout { polls: 3, .. }));
    assert_eq!(*polls.lock().await, 3);
}

#[tokio::test]
async fn failed_execution_is_surfaced_verbatim() {
    let state = RpcState {
        execution_error: Some("MoveAbort(task, 3)".into()),
        ..RpcState::default()
    };
    let url = spawn_rpc(state).await.expect("server");
    let reader = RpcChainReader::new(url);

    let effects = reader.wait_for_transaction(&digest()).await.expect("effects");
    let err = effects.ensure_success().expect_err("must fail");
    match err {
        ChainError::ExecutionFailed { error, .. } => assert_eq!(error, "MoveAbort(task, 3)"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unknown_method_errors_are_not_polled() {
    let state = RpcState::default();
    let methods = state.methods.clone();
    let url = spawn_rpc(state).await.expect("server");
    let reader = RpcChainReader::new(url);

    let err = reader
        .call("sui_unknown", json!([]))
        .await
        .expect_err("must fail");
    assert!(matches!(err, ChainError::Rpc { code: -32601, .. }));
    assert_eq!(methods.lock().await.len(), 1);
}

#[test]
fn find_created_ignores_type_parameters_and_other_changes() {
    let effects = TransactionEffects {
        digest: digest(),
        status: ExecutionStatus::Success,
        object_changes: vec![
            ObjectChange::Mutated {
                object_id: ObjectId::parse("0x1").expect("id"),
                object_type: IDEA_TYPE.into(),
            },
            ObjectChange::Created {
                object_id: ObjectId::parse("0x2").expect("id"),
                object_type: "0x2::kiosk::Kiosk".into(),
            },
            ObjectChange::Created {
                object_id: ObjectId::parse("0x3").expect("id"),
                object_type: format!("{IDEA_TYPE}<u64>"),
            },
        ],
    };
    assert_eq!(
        effects.find_created(IDEA_TYPE),
        Some(&ObjectId::parse("0x3").expect("id"))
    );
    assert!(matches!(
        effects.require_created("0x2::coin::Coin"),
        Err(ChainError::MissingCreatedObject { .. })
    ));
}

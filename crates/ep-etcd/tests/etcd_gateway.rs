//! Membership client tests against an in-process stand-in for etcd's
//! v3 JSON gateway

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use ep_core::error::MembershipError;
use ep_etcd::{EtcdClient, EtcdClientFactory, Member, MemberConfig, MembershipClient};
use ep_transport::Host;

#[derive(Default)]
struct Gateway {
    members: Mutex<Vec<(u64, String, Vec<String>)>>,
    next_id: Mutex<u64>,
}

fn member_json(id: u64, name: &str, peer_urls: &[String]) -> Value {
    json!({
        "ID": id.to_string(),
        "name": name,
        "peerURLs": peer_urls,
        "clientURLs": [],
    })
}

fn grpc_error(status: StatusCode, code: i32, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "error": message, "code": code, "message": message })),
    )
}

async fn list(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    let members: Vec<Value> = gw
        .members
        .lock()
        .unwrap()
        .iter()
        .map(|(id, name, urls)| member_json(*id, name, urls))
        .collect();
    Json(json!({ "header": { "cluster_id": "1" }, "members": members }))
}

async fn add(State(gw): State<Arc<Gateway>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let peer_urls: Vec<String> = body["peerURLs"]
        .as_array()
        .map(|urls| urls.iter().filter_map(|u| u.as_str().map(String::from)).collect())
        .unwrap_or_default();
    if peer_urls.is_empty() {
        return grpc_error(StatusCode::BAD_REQUEST, 3, "etcdserver: no peer URLs");
    }

    let mut members = gw.members.lock().unwrap();
    if members
        .iter()
        .any(|(_, _, urls)| urls.iter().any(|u| peer_urls.contains(u)))
    {
        return grpc_error(
            StatusCode::BAD_REQUEST,
            9,
            "etcdserver: Peer URLs already exists",
        );
    }

    let mut next_id = gw.next_id.lock().unwrap();
    *next_id += 1;
    members.push((*next_id, String::new(), peer_urls.clone()));
    (
        StatusCode::OK,
        Json(json!({ "header": {}, "member": member_json(*next_id, "", &peer_urls) })),
    )
}

async fn remove(
    State(gw): State<Arc<Gateway>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let id: u64 = body["ID"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
    let mut members = gw.members.lock().unwrap();
    let before = members.len();
    members.retain(|(member_id, _, _)| *member_id != id);
    if members.len() == before {
        return grpc_error(StatusCode::NOT_FOUND, 5, "etcdserver: member not found");
    }
    (StatusCode::OK, Json(json!({ "header": {}, "members": [] })))
}

async fn start(gateway: Arc<Gateway>) -> String {
    let app = Router::new()
        .route("/v3/cluster/member/list", post(list))
        .route("/v3/cluster/member/add", post(add))
        .route("/v3/cluster/member/remove", post(remove))
        .with_state(gateway);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

fn seeded() -> Arc<Gateway> {
    Arc::new(Gateway {
        members: Mutex::new(vec![(
            7,
            "etcd-foo".to_string(),
            vec!["https://10.0.0.5:2380".to_string()],
        )]),
        next_id: Mutex::new(100),
    })
}

fn client(endpoints: &[String]) -> EtcdClient {
    EtcdClient::new(endpoints, None, Duration::from_secs(2)).unwrap()
}

/// Address nothing listens on
async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

#[tokio::test]
async fn test_list_members() {
    let address = start(seeded()).await;
    let members = client(&[address]).list_members().await.unwrap();

    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, 7);
    assert_eq!(members[0].name, "etcd-foo");
    assert_eq!(members[0].peer_urls, vec!["https://10.0.0.5:2380"]);
}

#[tokio::test]
async fn test_add_member_and_duplicate() {
    let address = start(seeded()).await;
    let client = client(&[address]);
    let peer_urls = vec!["https://10.0.0.6:2380".to_string()];

    assert_eq!(client.add_member(&peer_urls).await.unwrap(), 101);
    assert!(matches!(
        client.add_member(&peer_urls).await,
        Err(MembershipError::AlreadyExists(_))
    ));
    assert_eq!(client.list_members().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_other_rejections_keep_their_code() {
    let address = start(seeded()).await;
    let result = client(&[address]).add_member(&[]).await;
    assert!(matches!(
        result,
        Err(MembershipError::Rejected { code: 3, ref message }) if message.contains("no peer URLs")
    ));
}

#[tokio::test]
async fn test_remove_member_and_not_found() {
    let address = start(seeded()).await;
    let client = client(&[address]);

    client.remove_member(7).await.unwrap();
    assert!(matches!(
        client.remove_member(7).await,
        Err(MembershipError::NotFound(7))
    ));
    assert!(client.list_members().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fails_over_to_next_endpoint() {
    let dead = closed_address().await;
    let live = start(seeded()).await;

    let members = client(&[dead, live]).list_members().await.unwrap();
    assert_eq!(members.len(), 1);
}

#[tokio::test]
async fn test_all_endpoints_down() {
    let result = client(&[closed_address().await]).list_members().await;
    assert!(matches!(result, Err(MembershipError::Request(_))));
}

#[tokio::test]
async fn test_request_deadline() {
    let app = Router::new().route(
        "/v3/cluster/member/list",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({}))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = EtcdClient::new(&[address], None, Duration::from_millis(200)).unwrap();
    let started = std::time::Instant::now();
    let result = client.list_members().await;

    assert!(matches!(result, Err(MembershipError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_member_join_and_leave_over_direct_host() {
    let gateway = seeded();
    let address = start(gateway.clone()).await;

    let member = Member::new(
        MemberConfig {
            name: "etcd-bar".into(),
            image: "quay.io/coreos/etcd:v3.4.13".into(),
            host: Host::direct(),
            peer_address: "10.0.0.6".into(),
            new_cluster: Some(false),
            ..Default::default()
        },
        Duration::from_secs(2),
    )
    .unwrap();
    let endpoints = vec![address];

    member.join(&endpoints, &EtcdClientFactory).await.unwrap();
    member.join(&endpoints, &EtcdClientFactory).await.unwrap();
    assert_eq!(gateway.members.lock().unwrap().len(), 2);

    let live = member.live_members(&endpoints, &EtcdClientFactory).await.unwrap();
    assert!(live
        .iter()
        .any(|m| m.peer_urls == vec!["https://10.0.0.6:2380".to_string()]));

    member.leave(&endpoints, &EtcdClientFactory).await.unwrap();
    member.leave(&endpoints, &EtcdClientFactory).await.unwrap();
    assert_eq!(gateway.members.lock().unwrap().len(), 1);
}

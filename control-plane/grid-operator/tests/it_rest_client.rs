// REST member client against a mock member endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use grid_operator::membership::rest::CLUSTER_PATH;
use grid_operator::membership::{
    ClientConfig, ClientError, ClusterClient, ClusterClientFactory,
    MembershipListener, MembershipState, MembershipStateChanged,
    RestClientFactory,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

// nothing listens on the tcpmux port, so connects are refused at once
const DEAD_ADDRESS: &str = "127.0.0.1:1";

type Seen = Arc<Mutex<Vec<(MembershipState, String)>>>;

fn recording_listener() -> (MembershipListener, Seen) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let listener: MembershipListener = Arc::new(move |ev: MembershipStateChanged| {
        sink.lock().unwrap().push((ev.state, ev.member.address));
    });
    (listener, seen)
}

fn member_list(hosts: &[&str]) -> String {
    let mut body = format!("Members {{size:{}, ver:1}} [\n", hosts.len());
    for (i, host) in hosts.iter().enumerate() {
        body.push_str(&format!(
            "\tMember [{host}]:5701 - 00000000-0000-4000-8000-00000000000{i}\n"
        ));
    }
    body.push_str("]\n");
    body
}

async fn serve_members(server: &MockServer, hosts: &[&str]) {
    Mock::given(method("GET"))
        .and(path(CLUSTER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(member_list(hosts)))
        .mount(server)
        .await;
}

fn factory(poll: Duration) -> RestClientFactory {
    RestClientFactory::new(poll, Duration::from_secs(2)).unwrap()
}

fn config(addresses: Vec<String>, unisocket: bool) -> ClientConfig {
    ClientConfig {
        cluster_name: "dev".into(),
        addresses,
        unisocket,
    }
}

async fn wait_for_events(seen: &Seen, count: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "saw {:?}", seen.lock().unwrap());
}

#[test_log::test(tokio::test)]
async fn connect_publishes_current_members() {
    let server = MockServer::start().await;
    serve_members(&server, &["10.0.0.1", "10.0.0.2"]).await;
    let (listener, seen) = recording_listener();

    let client = factory(Duration::from_secs(60))
        .connect(config(vec![server.address().to_string()], true), listener)
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (MembershipState::Added, "10.0.0.1:5701".to_string()),
            (MembershipState::Added, "10.0.0.2:5701".to_string()),
        ]
    );
    client.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn server_error_fails_the_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CLUSTER_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let (listener, seen) = recording_listener();

    let err = factory(Duration::from_secs(60))
        .connect(config(vec![server.address().to_string()], true), listener)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ClientError::Status(500)), "got {err:?}");
    assert!(seen.lock().unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn later_poll_publishes_removals_then_additions() {
    let server = MockServer::start().await;
    serve_members(&server, &["10.0.0.1", "10.0.0.2"]).await;
    let (listener, seen) = recording_listener();

    let client = factory(Duration::from_millis(50))
        .connect(config(vec![server.address().to_string()], true), listener)
        .await
        .unwrap();
    wait_for_events(&seen, 2).await;

    server.reset().await;
    serve_members(&server, &["10.0.0.2", "10.0.0.3"]).await;
    wait_for_events(&seen, 4).await;
    client.shutdown().await;

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen[2..4],
        [
            (MembershipState::Removed, "10.0.0.1:5701".to_string()),
            (MembershipState::Added, "10.0.0.3:5701".to_string()),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn unreachable_address_is_skipped_unless_unisocket() {
    let server = MockServer::start().await;
    serve_members(&server, &["10.0.0.1"]).await;
    let addresses = vec![DEAD_ADDRESS.to_string(), server.address().to_string()];

    let (listener, seen) = recording_listener();
    let client = factory(Duration::from_secs(60))
        .connect(config(addresses.clone(), false), listener)
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    client.shutdown().await;

    let (listener, seen) = recording_listener();
    let err = factory(Duration::from_secs(60))
        .connect(config(addresses, true), listener)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::Http(_)), "got {err:?}");
    assert!(seen.lock().unwrap().is_empty());
}

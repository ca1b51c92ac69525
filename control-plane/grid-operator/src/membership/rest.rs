use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{
    ClientConfig, ClientError, ClusterClient, ClusterClientFactory,
    MemberInfo, MembershipListener, MembershipStateChanged,
};

pub const CLUSTER_PATH: &str = "/hazelcast/rest/cluster";

/// Connects by polling a member's REST endpoint for the member list.
#[derive(Clone, Debug)]
pub struct RestClientFactory {
    http: reqwest::Client,
    poll_interval: Duration,
}

impl RestClientFactory {
    pub fn new(
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            poll_interval,
        })
    }
}

#[async_trait]
impl ClusterClientFactory for RestClientFactory {
    async fn connect(
        &self,
        config: ClientConfig,
        listener: MembershipListener,
    ) -> Result<Box<dyn ClusterClient>, ClientError> {
        let urls = member_urls(&config);
        if urls.is_empty() {
            return Err(ClientError::NoAddress);
        }

        // the first fetch doubles as the reachability check
        let (current, members) = fetch_any(&self.http, &urls, 0).await?;
        let mut known = BTreeMap::new();
        publish_diff(&mut known, members, &listener);
        info!(
            url = %urls[current],
            cluster_name = %config.cluster_name,
            members = known.len(),
            "connected to cluster"
        );

        let task = tokio::spawn(poll_members(
            self.http.clone(),
            urls,
            current,
            self.poll_interval,
            known,
            listener,
        ));
        Ok(Box::new(RestMembershipClient { task }))
    }
}

/// A unisocket client only ever talks to its first address.
fn member_urls(config: &ClientConfig) -> Vec<String> {
    let take = if config.unisocket { 1 } else { config.addresses.len() };
    config
        .addresses
        .iter()
        .take(take)
        .map(|address| format!("http://{address}{CLUSTER_PATH}"))
        .collect()
}

/// Try every url once, starting at `start`, and return the index that
/// answered along with its member list. Fails with the last error seen.
async fn fetch_any(
    http: &reqwest::Client,
    urls: &[String],
    start: usize,
) -> Result<(usize, Vec<MemberInfo>), ClientError> {
    let mut last_err = ClientError::NoAddress;
    for offset in 0..urls.len() {
        let idx = (start + offset) % urls.len();
        match fetch_members(http, &urls[idx]).await {
            Ok(members) => return Ok((idx, members)),
            Err(e) => {
                debug!(url = %urls[idx], error = %e, "member endpoint unavailable");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

#[derive(Debug)]
pub struct RestMembershipClient {
    task: JoinHandle<()>,
}

#[async_trait]
impl ClusterClient for RestMembershipClient {
    async fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for RestMembershipClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn fetch_members(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<MemberInfo>, ClientError> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ClientError::Status(status.as_u16()));
    }
    let body = resp.text().await?;
    parse_member_list(&body)
}

async fn poll_members(
    http: reqwest::Client,
    urls: Vec<String>,
    mut current: usize,
    interval: Duration,
    mut known: BTreeMap<String, MemberInfo>,
    listener: MembershipListener,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the immediate first tick is covered by the fetch done on connect
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match fetch_any(&http, &urls, current).await {
            Ok((idx, members)) => {
                current = idx;
                publish_diff(&mut known, members, &listener);
            }
            // keep the last known view until an endpoint answers again
            Err(e) => debug!(error = %e, "member poll failed"),
        }
    }
}

/// Emit `Removed` for members that disappeared, then `Added` for new ones,
/// and fold the result into `known`.
pub(crate) fn publish_diff(
    known: &mut BTreeMap<String, MemberInfo>,
    current: Vec<MemberInfo>,
    listener: &MembershipListener,
) {
    let current: BTreeMap<String, MemberInfo> =
        current.into_iter().map(|m| (m.id(), m)).collect();

    let gone: Vec<String> = known
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();
    for id in gone {
        if let Some(member) = known.remove(&id) {
            listener(MembershipStateChanged::removed(member));
        }
    }
    for (id, member) in current {
        if !known.contains_key(&id) {
            known.insert(id, member.clone());
            listener(MembershipStateChanged::added(member));
        }
    }
}

/// Parse the plain-text member list served at [`CLUSTER_PATH`]:
///
/// ```text
/// Members {size:2, ver:2} [
///     Member [10.0.0.1]:5701 - 6f1c... this
///     Member [10.0.0.2]:5701 - 0b7e...
/// ]
/// ```
pub fn parse_member_list(body: &str) -> Result<Vec<MemberInfo>, ClientError> {
    if !body.lines().any(|l| l.trim_start().starts_with("Members {")) {
        return Err(ClientError::Parse(
            body.lines().next().unwrap_or_default().to_string(),
        ));
    }
    body.lines()
        .map(str::trim)
        .filter(|l| l.starts_with("Member ["))
        .map(parse_member_line)
        .collect()
}

fn parse_member_line(line: &str) -> Result<MemberInfo, ClientError> {
    let bad = || ClientError::Parse(line.to_string());
    let rest = line.strip_prefix("Member ").ok_or_else(bad)?;
    let (address, tail) = rest.split_once(" - ").ok_or_else(bad)?;
    let uuid = tail.split_whitespace().next().ok_or_else(bad)?;
    // "[10.0.0.1]:5701" -> "10.0.0.1:5701"; IPv6 hosts keep their brackets
    let host_end = address.find("]:").ok_or_else(bad)?;
    let host = &address[1..host_end];
    let port = &address[host_end + 2..];
    let address = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    Ok(MemberInfo::new(address, uuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipState;
    use std::sync::{Arc, Mutex};

    const BODY: &str = "Members {size:2, ver:2} [\n\
        \tMember [10.0.0.1]:5701 - 6f1c2b1e-1111-4c1e-9c1e-000000000001 this\n\
        \tMember [10.0.0.2]:5701 - 0b7e2c2f-2222-4c1e-9c1e-000000000002\n\
        ]\n\n\
        ConnectionCount: 1\n\
        AllConnectionCount: 4\n";

    #[test]
    fn parses_member_lines() {
        let members = parse_member_list(BODY).unwrap();
        assert_eq!(
            members,
            vec![
                MemberInfo::new(
                    "10.0.0.1:5701",
                    "6f1c2b1e-1111-4c1e-9c1e-000000000001"
                ),
                MemberInfo::new(
                    "10.0.0.2:5701",
                    "0b7e2c2f-2222-4c1e-9c1e-000000000002"
                ),
            ]
        );
        assert_eq!(
            members[0].id(),
            "Member 10.0.0.1:5701 - 6f1c2b1e-1111-4c1e-9c1e-000000000001"
        );
    }

    #[test]
    fn ipv6_hosts_keep_brackets() {
        let body = "Members {size:1, ver:1} [\n Member [fd00::1]:5701 - u1 this\n]";
        let members = parse_member_list(body).unwrap();
        assert_eq!(members[0].address, "[fd00::1]:5701");
    }

    #[test]
    fn rejects_unknown_payload() {
        assert!(matches!(
            parse_member_list("<html>nope</html>"),
            Err(ClientError::Parse(_))
        ));
        assert!(matches!(
            parse_member_list("Members {size:1, ver:1} [\n Member [10.0.0.1]:5701 garbage\n]"),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn diff_emits_removals_before_additions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: MembershipListener = Arc::new(move |ev: MembershipStateChanged| {
            sink.lock().unwrap().push((ev.state, ev.member.address));
        });
        let a = MemberInfo::new("a:1", "ua");
        let b = MemberInfo::new("b:1", "ub");
        let c = MemberInfo::new("c:1", "uc");

        let mut known = BTreeMap::new();
        publish_diff(&mut known, vec![a.clone(), b.clone()], &listener);
        publish_diff(&mut known, vec![b.clone(), c.clone()], &listener);
        // unchanged view publishes nothing
        publish_diff(&mut known, vec![c, b], &listener);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (MembershipState::Added, "a:1".to_string()),
                (MembershipState::Added, "b:1".to_string()),
                (MembershipState::Removed, "a:1".to_string()),
                (MembershipState::Added, "c:1".to_string()),
            ]
        );
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn unisocket_uses_only_the_first_address() {
        let mut cfg = ClientConfig {
            cluster_name: "dev".into(),
            addresses: vec!["a:5701".into(), "b:5701".into()],
            unisocket: false,
        };
        assert_eq!(
            member_urls(&cfg),
            vec![
                format!("http://a:5701{CLUSTER_PATH}"),
                format!("http://b:5701{CLUSTER_PATH}"),
            ]
        );
        cfg.unisocket = true;
        assert_eq!(member_urls(&cfg), vec![format!("http://a:5701{CLUSTER_PATH}")]);
    }
}

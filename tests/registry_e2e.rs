//! End-to-end registry scenarios: fleet polling, health probing and
//! lookups driven through the public handle.

mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use watchdns::config::{RecordSort, RegistryOptions};
use watchdns::ServiceRegistry;

use common::{wait_for_a_count, HttpProbeTarget, MockFleet};

fn fast_options() -> RegistryOptions {
    RegistryOptions {
        domain: "example.".to_string(),
        check_resolution: Duration::from_millis(20),
        fleet_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(50),
        check_timeout: Duration::from_secs(1),
        check_concurrent: 4,
        record_sort: RecordSort::Default,
    }
}

#[tokio::test]
async fn healthy_unit_resolves_with_check_interval_ttl() {
    let target = HttpProbeTarget::start().await;
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "127.0.0.1");
    fleet.set_unit("web.service", "m1", "h1", true);
    let check_url = format!("http://%H:{}/health", target.addr.port());
    fleet.set_unit_options(
        "web.service",
        &[("Name", "web"), ("CheckHttp", check_url.as_str())],
    );

    let cancel = CancellationToken::new();
    let options = fast_options();
    let check_interval = options.check_interval;
    let handle = ServiceRegistry::new(Arc::new(fleet), options)
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "web.service.example.", 1).await);
    let answers = handle.lookup_a("web.service.example.").await;
    assert_eq!(answers[0].server, "127.0.0.1".parse::<IpAddr>().unwrap());
    assert_eq!(answers[0].ttl, check_interval);

    cancel.cancel();
}

#[tokio::test]
async fn failing_probe_takes_unit_offline_and_recovery_restores_it() {
    let target = HttpProbeTarget::start().await;
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "127.0.0.1");
    fleet.set_unit("web.service", "m1", "h1", true);
    let check_url = format!("http://%H:{}/health", target.addr.port());
    fleet.set_unit_options("web.service", &[("CheckHttp", check_url.as_str())]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "web.service.example.", 1).await);

    target.set_healthy(false);
    assert!(wait_for_a_count(&handle, "web.service.example.", 0).await);

    target.set_healthy(true);
    assert!(wait_for_a_count(&handle, "web.service.example.", 1).await);

    cancel.cancel();
}

#[tokio::test]
async fn srv_declaration_resolves_with_target() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.set_unit("chat.service", "m1", "h1", true);
    fleet.set_unit_options("chat.service", &[("Srv", "xmpp:tcp:5222:10:20")]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "chat.service.example.", 1).await);
    let answers = handle
        .lookup_srv("_xmpp._tcp.example.", "xmpp", "tcp")
        .await;
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].srv.priority, 10);
    assert_eq!(answers[0].srv.weight, 20);
    assert_eq!(answers[0].srv.port, 5222);
    assert_eq!(answers[0].server, "10.0.0.1".parse::<IpAddr>().unwrap());
    assert_eq!(answers[0].target, "chat.service.example.");

    // swapped labels must not match
    assert!(handle
        .lookup_srv("_xmpp._tcp.example.", "tcp", "xmpp")
        .await
        .is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn instance_unit_resolves_under_its_tag() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.set_unit("web@blue.service", "m1", "h1", true);
    fleet.set_unit_options("web@blue.service", &[("Name", "web")]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "i-blue.web.service.example.", 1).await);
    let answers = handle.lookup_a("i-blue.web.service.example.").await;
    assert_eq!(answers[0].server, "10.0.0.1".parse::<IpAddr>().unwrap());

    cancel.cancel();
}

#[tokio::test]
async fn checkless_unit_comes_online_without_probe_io() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.set_unit("quiet.service", "m1", "h1", true);
    fleet.set_unit_options("quiet.service", &[]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "quiet.service.example.", 1).await);

    cancel.cancel();
}

#[tokio::test]
async fn vanished_unit_becomes_unreachable_on_next_poll() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.set_unit("web.service", "m1", "h1", true);
    fleet.set_unit_options("web.service", &[]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet.clone()), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "web.service.example.", 1).await);

    fleet.remove_unit("web.service");
    assert!(wait_for_a_count(&handle, "web.service.example.", 0).await);

    cancel.cancel();
}

#[tokio::test]
async fn two_placements_yield_two_answers() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.add_machine("m2", "10.0.0.2");
    fleet.set_unit("app.service", "m1", "h1", true);
    fleet.set_unit("app.service", "m2", "h1", true);
    fleet.set_unit_options("app.service", &[("Name", "app")]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    assert!(wait_for_a_count(&handle, "app.service.example.", 2).await);
    let mut servers: Vec<IpAddr> = handle
        .lookup_a("app.service.example.")
        .await
        .into_iter()
        .map(|a| a.server)
        .collect();
    servers.sort();
    assert_eq!(
        servers,
        vec![
            "10.0.0.1".parse::<IpAddr>().unwrap(),
            "10.0.0.2".parse::<IpAddr>().unwrap()
        ]
    );

    cancel.cancel();
}

#[tokio::test]
async fn inactive_unit_is_not_answered() {
    let fleet = MockFleet::default();
    fleet.add_machine("m1", "10.0.0.1");
    fleet.set_unit("web.service", "m1", "h1", false);
    fleet.set_unit_options("web.service", &[]);

    let cancel = CancellationToken::new();
    let handle = ServiceRegistry::new(Arc::new(fleet), fast_options())
        .start(cancel.clone())
        .await
        .unwrap();

    // give the loop a few health ticks; the unit may come online but must
    // stay unanswered while inactive
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.lookup_a("web.service.example.").await.is_empty());

    cancel.cancel();
}

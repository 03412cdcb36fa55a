// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sip_balancer::{
    build_algorithm, AlgorithmConfig, BalancerAlgorithm, BalancerConfig, BalancerContext,
    BalancerGateway, CallTimeouts, LegConfig, Leg, Node, NodeRegistry,
};
use sip_core::{Method, Request, Response};
use sip_observe::BalancerObserver;
use sip_testkit::{
    build_bye, build_invite, build_response, RecordingDispatcher, RequestBuilder,
};
use sip_transport::TransportKind;

const TARGET: &str = "sip:bob@example.com";

fn dual_config() -> BalancerConfig {
    BalancerConfig {
        host: "10.0.0.1".into(),
        internal: Some(LegConfig {
            port: 5065,
            ..LegConfig::default()
        }),
        ..BalancerConfig::default()
    }
}

fn single_config() -> BalancerConfig {
    BalancerConfig {
        host: "10.0.0.1".into(),
        ..BalancerConfig::default()
    }
}

fn two_nodes() -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_nodes([
        Node::new("as1", "10.0.0.5", 4060, vec![TransportKind::Udp]),
        Node::new("as2", "10.0.0.6", 4060, vec![TransportKind::Udp]),
    ]))
}

/// Always picks the first live node and counts how often it is asked.
struct Spy {
    registry: Arc<NodeRegistry>,
    selections: AtomicUsize,
    /// Node IP of every explicit pin, in call order.
    assignments: Mutex<Vec<String>>,
    internal_responses: AtomicUsize,
    external_responses: AtomicUsize,
}

impl Spy {
    fn new(registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            selections: AtomicUsize::new(0),
            assignments: Mutex::new(Vec::new()),
            internal_responses: AtomicUsize::new(0),
            external_responses: AtomicUsize::new(0),
        })
    }
}

impl BalancerAlgorithm for Spy {
    fn name(&self) -> &'static str {
        "spy"
    }

    fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    fn select_node(&self, _request: &Request, _call_id: &str) -> Option<Arc<Node>> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        self.registry.live_nodes().into_iter().next()
    }

    fn assign_to_node(&self, call_id: &str, node: Arc<Node>) {
        self.assignments.lock().push(node.ip().to_string());
        self.registry.assign_to_node(call_id, node);
    }

    fn process_internal_response(&self, _response: &Response) {
        self.internal_responses.fetch_add(1, Ordering::SeqCst);
    }

    fn process_external_response(&self, _response: &Response) {
        self.external_responses.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    gateway: BalancerGateway,
    dispatcher: Arc<RecordingDispatcher>,
    spy: Arc<Spy>,
}

fn harness(config: BalancerConfig, registry: Arc<NodeRegistry>) -> Harness {
    let ctx = Arc::new(BalancerContext::from_config(&config).unwrap());
    let spy = Spy::new(registry);
    let dispatcher = RecordingDispatcher::new();
    let gateway = BalancerGateway::new(ctx, spy.clone(), dispatcher.clone());
    Harness {
        gateway,
        dispatcher,
        spy,
    }
}

fn route_values(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all("Route")
        .flat_map(|line| sip_core::route::split_header_values(line))
        .map(str::to_owned)
        .collect()
}

#[tokio::test]
async fn empty_registry_answers_server_error() {
    let h = harness(dual_config(), Arc::new(NodeRegistry::new()));

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-a@client"))
        .await;

    assert!(h.dispatcher.requests().is_empty());
    let responses = h.dispatcher.responses();
    assert_eq!(responses.len(), 1);
    let (leg, response) = &responses[0];
    assert_eq!(*leg, Leg::External);
    assert_eq!(response.code(), 500);
    assert_eq!(response.call_id(), Some("call-a@client"));
    // the local answer carries the caller's Via only
    assert_eq!(response.headers().count("Via"), 1);

    let stats = h.gateway.stats();
    assert_eq!(stats.requests_processed, 1);
    assert_eq!(stats.responses_processed, 0);
}

#[tokio::test]
async fn ack_without_node_is_dropped_silently() {
    let h = harness(dual_config(), Arc::new(NodeRegistry::new()));

    let ack = RequestBuilder::new(Method::Ack, TARGET).call_id("call-b").build();
    h.gateway.handle_request(Leg::External, ack).await;

    assert!(h.dispatcher.requests().is_empty());
    assert!(h.dispatcher.responses().is_empty());
}

#[tokio::test]
async fn exhausted_max_forwards_answers_483() {
    let h = harness(dual_config(), two_nodes());

    let invite = RequestBuilder::new(Method::Invite, TARGET)
        .max_forwards(Some(1))
        .build();
    h.gateway.handle_request(Leg::External, invite).await;

    assert!(h.dispatcher.requests().is_empty());
    let (leg, response) = h.dispatcher.last_response().unwrap();
    assert_eq!(leg, Leg::External);
    assert_eq!(response.code(), 483);
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.registry().sticky_count(), 0);
}

#[tokio::test]
async fn cancel_is_exempt_from_max_forwards() {
    let h = harness(dual_config(), two_nodes());

    let cancel = RequestBuilder::new(Method::Cancel, TARGET)
        .max_forwards(Some(1))
        .build();
    h.gateway.handle_request(Leg::External, cancel).await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(forwarded.headers().get("Max-Forwards").unwrap().as_str(), "1");
}

#[tokio::test]
async fn missing_max_forwards_gets_the_ceiling() {
    let h = harness(dual_config(), two_nodes());

    let invite = RequestBuilder::new(Method::Invite, TARGET)
        .max_forwards(None)
        .build();
    h.gateway.handle_request(Leg::External, invite).await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(forwarded.headers().get("Max-Forwards").unwrap().as_str(), "70");
}

#[tokio::test]
async fn route_hint_pins_the_named_node() {
    let h = harness(dual_config(), two_nodes());

    let invite = RequestBuilder::new(Method::Invite, TARGET)
        .call_id("call-c")
        .route("<sip:10.0.0.1:5060;lr;node_host=10.0.0.6;node_port=4060>")
        .build();
    h.gateway.handle_request(Leg::External, invite).await;

    let pinned = h.gateway.registry().get_assigned_node("call-c").unwrap();
    assert_eq!(pinned.ip(), "10.0.0.6");
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 0);

    let (leg, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(leg, Leg::Internal);
    assert_eq!(
        route_values(&forwarded),
        vec!["<sip:10.0.0.6:4060;transport=udp;lr>".to_string()]
    );
}

#[tokio::test]
async fn route_hint_wins_over_any_policy() {
    for algorithm in [
        AlgorithmConfig::RoundRobin,
        AlgorithmConfig::CallIdHash,
        AlgorithmConfig::HeaderAffinity {
            header: "From".into(),
        },
    ] {
        let registry = two_nodes();
        let ctx = Arc::new(BalancerContext::from_config(&dual_config()).unwrap());
        let dispatcher = RecordingDispatcher::new();
        let gateway = BalancerGateway::new(
            ctx,
            build_algorithm(&algorithm, registry.clone()),
            dispatcher.clone(),
        );

        for i in 0..4 {
            let call_id = format!("hinted-{i}");
            let invite = RequestBuilder::new(Method::Invite, TARGET)
                .call_id(&call_id)
                .route("<sip:10.0.0.1:5060;lr;node_host=10.0.0.5;node_port=4060>")
                .build();
            gateway.handle_request(Leg::External, invite).await;
            assert_eq!(registry.get_assigned_node(&call_id).unwrap().ip(), "10.0.0.5");
        }
    }
}

#[tokio::test]
async fn dual_leg_dialog_request_gets_two_record_routes() {
    let h = harness(dual_config(), two_nodes());

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-rr"))
        .await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    let rr: Vec<String> = forwarded
        .headers()
        .get_all("Record-Route")
        .map(|v| v.to_string())
        .collect();
    assert_eq!(
        rr,
        vec![
            "<sip:10.0.0.1:5065;transport=udp;lr>",
            "<sip:10.0.0.1:5060;transport=udp;lr>",
        ]
    );
}

#[tokio::test]
async fn single_leg_dialog_request_gets_one_record_route() {
    let h = harness(single_config(), two_nodes());

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-rr1"))
        .await;

    let (leg, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(leg, Leg::External);
    assert_eq!(forwarded.headers().count("Record-Route"), 1);
}

#[tokio::test]
async fn non_dialog_request_gets_no_record_route() {
    let h = harness(dual_config(), two_nodes());

    h.gateway
        .handle_request(Leg::External, build_bye(TARGET, "call-bye"))
        .await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(forwarded.headers().count("Record-Route"), 0);
}

#[tokio::test]
async fn forwarded_request_carries_balancer_via() {
    let h = harness(dual_config(), two_nodes());

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "abcdefgh@client"))
        .await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    let via = forwarded.top_via().unwrap();
    assert_eq!(via.host(), "10.0.0.1");
    assert_eq!(via.port(), Some(5065));
    assert_eq!(via.branch(), Some("z9hG4bKclient1abcde"));
    assert_eq!(forwarded.headers().count("Via"), 2);
    assert_eq!(forwarded.headers().get("Max-Forwards").unwrap().as_str(), "69");
}

#[tokio::test]
async fn at_most_two_own_routes_are_stripped() {
    let h = harness(dual_config(), two_nodes());

    let request = RequestBuilder::new(Method::Bye, TARGET)
        .via("SIP/2.0/UDP 10.0.0.5:4060;branch=z9hG4bKnode")
        .route("<sip:10.0.0.1:5065;lr>")
        .route("<sip:10.0.0.1:5060;lr>")
        .route("<sip:10.0.0.1:5060;lr>")
        .route("<sip:proxy.example.net;lr>")
        .build();
    h.gateway.handle_request(Leg::Internal, request).await;

    let (leg, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(leg, Leg::External);
    assert_eq!(
        route_values(&forwarded),
        vec!["<sip:10.0.0.1:5060;lr>", "<sip:proxy.example.net;lr>"]
    );
}

#[tokio::test]
async fn only_the_first_route_hint_is_applied() {
    let h = harness(dual_config(), two_nodes());

    let bye = RequestBuilder::new(Method::Bye, TARGET)
        .call_id("call-two-hints")
        .route("<sip:10.0.0.1:5060;lr;node_host=10.0.0.6;node_port=4060>")
        .route("<sip:10.0.0.1:5065;lr;node_host=10.0.0.5;node_port=4060>")
        .build();
    h.gateway.handle_request(Leg::External, bye).await;

    assert_eq!(*h.spy.assignments.lock(), vec!["10.0.0.6"]);
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 0);
    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(
        route_values(&forwarded),
        vec!["<sip:10.0.0.6:4060;transport=udp;lr>".to_string()]
    );
}

#[tokio::test]
async fn stripping_stops_at_a_foreign_route() {
    let h = harness(dual_config(), two_nodes());

    let request = RequestBuilder::new(Method::Bye, TARGET)
        .via("SIP/2.0/UDP 10.0.0.5:4060;branch=z9hG4bKnode")
        .route("<sip:proxy.example.net;lr>")
        .route("<sip:10.0.0.1:5060;lr>")
        .build();
    h.gateway.handle_request(Leg::Internal, request).await;

    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(route_values(&forwarded).len(), 2);
}

#[tokio::test]
async fn internal_request_pins_its_node() {
    let h = harness(dual_config(), two_nodes());

    let request = RequestBuilder::new(Method::Invite, "sip:carol@example.org")
        .via("SIP/2.0/UDP 10.0.0.6:4060;branch=z9hG4bKout")
        .call_id("outbound-1")
        .build();
    h.gateway.handle_request(Leg::Internal, request).await;
    assert_eq!(
        h.gateway.registry().get_assigned_node("outbound-1").unwrap().ip(),
        "10.0.0.6"
    );
    assert_eq!(*h.spy.assignments.lock(), vec!["10.0.0.6"]);

    // the balancer's Via goes on top of the node's
    let (_, outbound) = h.dispatcher.last_request().unwrap();
    let vias: Vec<String> = outbound
        .headers()
        .get_all("Via")
        .map(|v| v.to_string())
        .collect();
    assert!(vias[0].starts_with("SIP/2.0/UDP 10.0.0.1:5060;"), "{vias:?}");
    assert!(vias[1].starts_with("SIP/2.0/UDP 10.0.0.6:4060;"), "{vias:?}");

    // the far end's in-dialog request comes back to the same node
    h.gateway
        .handle_request(Leg::External, build_bye("sip:10.0.0.1", "outbound-1"))
        .await;
    let (leg, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(leg, Leg::Internal);
    assert_eq!(
        route_values(&forwarded)[0],
        "<sip:10.0.0.6:4060;transport=udp;lr>"
    );
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_leg_classifies_origin_by_via() {
    let h = harness(single_config(), two_nodes());

    let from_node = RequestBuilder::new(Method::Invite, "sip:carol@example.org")
        .via("SIP/2.0/UDP 10.0.0.5:4060;branch=z9hG4bKout")
        .call_id("single-out")
        .build();
    assert_eq!(h.gateway.origin_of(Leg::External, &from_node), Leg::Internal);
    h.gateway.handle_request(Leg::External, from_node).await;

    let (leg, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(leg, Leg::External);
    assert!(route_values(&forwarded).is_empty());
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dual_leg_response_crosses_to_the_other_leg() {
    let h = harness(dual_config(), two_nodes());

    let response = build_response(
        180,
        "Ringing",
        &[
            "SIP/2.0/UDP 10.0.0.1:5065;branch=z9hG4bKclient1call-",
            "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1",
        ],
        "call-x",
    );
    h.gateway.handle_response(Leg::Internal, response).await;

    let (leg, forwarded) = h.dispatcher.last_response().unwrap();
    assert_eq!(leg, Leg::External);
    assert_eq!(forwarded.headers().count("Via"), 1);
    assert_eq!(forwarded.top_via().unwrap().host(), "client.example.com");
    assert_eq!(h.spy.internal_responses.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.stats().responses_processed, 1);

    let response = build_response(
        200,
        "OK",
        &[
            "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKout",
            "SIP/2.0/UDP 10.0.0.5:4060;branch=z9hG4bKnode",
        ],
        "call-y",
    );
    h.gateway.handle_response(Leg::External, response).await;
    let (leg, _) = h.dispatcher.last_response().unwrap();
    assert_eq!(leg, Leg::Internal);
    assert_eq!(h.spy.external_responses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_leg_response_hooks_follow_remaining_via() {
    let h = harness(single_config(), two_nodes());

    // answer from a node to an outside caller
    let from_node = build_response(
        200,
        "OK",
        &[
            "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKa",
            "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1",
        ],
        "call-1",
    );
    h.gateway.handle_response(Leg::External, from_node).await;
    assert_eq!(h.spy.internal_responses.load(Ordering::SeqCst), 1);

    // answer from outside to a node
    let from_outside = build_response(
        200,
        "OK",
        &[
            "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKb",
            "SIP/2.0/UDP 10.0.0.6:4060;branch=z9hG4bKnode",
        ],
        "call-2",
    );
    h.gateway.handle_response(Leg::External, from_outside).await;
    assert_eq!(h.spy.external_responses.load(Ordering::SeqCst), 1);

    assert!(h
        .dispatcher
        .responses()
        .iter()
        .all(|(leg, _)| *leg == Leg::External));
}

#[tokio::test]
async fn foreign_top_via_is_left_in_place() {
    let h = harness(dual_config(), two_nodes());

    let response = build_response(
        200,
        "OK",
        &["SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1"],
        "call-z",
    );
    h.gateway.handle_response(Leg::Internal, response).await;
    let (_, forwarded) = h.dispatcher.last_response().unwrap();
    assert_eq!(forwarded.headers().count("Via"), 1);
}

#[tokio::test]
async fn bye_completion_and_timeouts_release_pins() {
    let h = harness(dual_config(), two_nodes());
    let invite = build_invite(TARGET, "call-end");
    h.gateway.handle_request(Leg::External, invite.clone()).await;
    assert!(h.gateway.registry().get_assigned_node("call-end").is_some());

    h.gateway.on_transaction_terminated(&invite);
    assert!(h.gateway.registry().get_assigned_node("call-end").is_some());

    h.gateway
        .on_transaction_terminated(&build_bye(TARGET, "call-end"));
    assert!(h.gateway.registry().get_assigned_node("call-end").is_none());

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-lost"))
        .await;
    h.gateway.on_timeout(&build_invite(TARGET, "call-lost"));
    assert!(h.gateway.registry().get_assigned_node("call-lost").is_none());
}

#[tokio::test]
async fn missing_call_id_answers_server_error() {
    let h = harness(dual_config(), two_nodes());

    let invite = RequestBuilder::new(Method::Invite, TARGET)
        .without_call_id()
        .build();
    h.gateway.handle_request(Leg::External, invite).await;

    assert!(h.dispatcher.requests().is_empty());
    assert_eq!(h.dispatcher.last_response().unwrap().1.code(), 500);
}

#[tokio::test]
async fn transmit_failures_are_swallowed() {
    let h = harness(dual_config(), two_nodes());
    h.dispatcher.set_failing(true);

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-fail"))
        .await;

    assert_eq!(h.dispatcher.requests().len(), 1);
    assert!(h.dispatcher.responses().is_empty());
    assert_eq!(h.gateway.stats().requests_processed, 1);
}

#[tokio::test]
async fn pins_survive_node_departure() {
    let h = harness(dual_config(), two_nodes());
    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-dead"))
        .await;
    let node = h.gateway.registry().get_assigned_node("call-dead").unwrap();
    h.gateway.registry().remove_node(node.id());

    h.gateway
        .handle_request(Leg::External, build_bye(TARGET, "call-dead"))
        .await;
    let (_, forwarded) = h.dispatcher.last_request().unwrap();
    assert_eq!(
        route_values(&forwarded)[0],
        node.route_value(TransportKind::Udp)
    );
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl BalancerObserver for Recorder {
    fn on_request_forwarded(&self, method: &str, from_leg: &str, to_leg: &str) {
        self.events
            .lock()
            .push(format!("request {method} {from_leg}->{to_leg}"));
    }

    fn on_local_response(&self, code: u16, method: &str) {
        self.events.lock().push(format!("local {code} {method}"));
    }

    fn on_node_assigned(&self, algorithm: &str, node: &str) {
        self.events.lock().push(format!("assigned {algorithm} {node}"));
    }

    fn on_unstick(&self, call_id: &str) {
        self.events.lock().push(format!("unstick {call_id}"));
    }
}

#[tokio::test]
async fn observer_sees_the_call_lifecycle() {
    let registry = two_nodes();
    let dispatcher = RecordingDispatcher::new();
    let recorder = Arc::new(Recorder::default());
    let gateway = BalancerGateway::from_config(
        &BalancerConfig {
            algorithm: AlgorithmConfig::CallIdHash,
            ..dual_config()
        },
        registry,
        dispatcher,
    )
    .unwrap()
    .with_observer(recorder.clone());

    gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-obs"))
        .await;
    gateway
        .handle_request(Leg::External, build_bye(TARGET, "call-obs"))
        .await;
    gateway.on_transaction_terminated(&build_bye(TARGET, "call-obs"));

    let events = recorder.events.lock().clone();
    assert_eq!(events.len(), 4, "{events:?}");
    assert!(events[0].starts_with("assigned call_id_hash 10.0.0."));
    assert_eq!(events[1], "request INVITE external->internal");
    assert_eq!(events[2], "request BYE external->internal");
    assert_eq!(events[3], "unstick call-obs");
}

#[tokio::test]
async fn final_bye_response_releases_the_pin() {
    let h = harness(dual_config(), two_nodes());
    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-hangup"))
        .await;

    let vias = [
        "SIP/2.0/UDP 10.0.0.1:5065;branch=z9hG4bKbye",
        "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1",
    ];
    let mut ringing = build_response(180, "Ringing", &vias, "call-hangup");
    ringing.headers_mut().set_or_push("CSeq", "2 BYE");
    h.gateway.handle_response(Leg::Internal, ringing).await;
    assert!(h.gateway.registry().get_assigned_node("call-hangup").is_some());

    let mut ok = build_response(200, "OK", &vias, "call-hangup");
    ok.headers_mut().set_or_push("CSeq", "2 BYE");
    h.gateway.handle_response(Leg::Internal, ok).await;
    assert!(h.gateway.registry().get_assigned_node("call-hangup").is_none());
}

/// Answer from the cluster to an INVITE the caller sent through the balancer.
fn node_answer(code: u16, reason: &str, call_id: &str) -> Response {
    build_response(
        code,
        reason,
        &[
            "SIP/2.0/UDP 10.0.0.1:5065;branch=z9hG4bKclient1call-",
            "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1",
        ],
        call_id,
    )
}

#[tokio::test]
async fn rejected_call_setup_releases_the_pin() {
    let h = harness(dual_config(), two_nodes());
    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-busy"))
        .await;
    assert_eq!(h.gateway.active_calls(), 1);

    h.gateway
        .handle_response(Leg::Internal, node_answer(100, "Trying", "call-busy"))
        .await;
    assert!(h.gateway.registry().get_assigned_node("call-busy").is_some());

    h.gateway
        .handle_response(Leg::Internal, node_answer(486, "Busy Here", "call-busy"))
        .await;
    assert!(h.gateway.registry().get_assigned_node("call-busy").is_none());
    assert_eq!(h.gateway.active_calls(), 0);
    assert_eq!(h.gateway.registry().sticky_count(), 0);
}

#[tokio::test]
async fn auth_challenge_keeps_the_pin() {
    let h = harness(dual_config(), two_nodes());
    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-auth"))
        .await;

    h.gateway
        .handle_response(
            Leg::Internal,
            node_answer(407, "Proxy Authentication Required", "call-auth"),
        )
        .await;
    assert!(h.gateway.registry().get_assigned_node("call-auth").is_some());
}

#[tokio::test]
async fn failed_reinvite_keeps_an_established_call() {
    let h = harness(dual_config(), two_nodes());
    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-up"))
        .await;
    h.gateway
        .handle_response(Leg::Internal, node_answer(200, "OK", "call-up"))
        .await;

    h.gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-up"))
        .await;
    h.gateway
        .handle_response(Leg::Internal, node_answer(491, "Request Pending", "call-up"))
        .await;
    assert!(h.gateway.registry().get_assigned_node("call-up").is_some());
    assert_eq!(h.spy.selections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quiet_calls_are_released_by_the_sweep() {
    let h = harness(dual_config(), two_nodes());
    let gateway = h.gateway.with_call_timeouts(CallTimeouts {
        unanswered: Duration::ZERO,
        idle: Duration::from_secs(3600),
    });

    gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-silent"))
        .await;
    gateway
        .handle_request(Leg::External, build_invite(TARGET, "call-ringing"))
        .await;
    gateway
        .handle_response(Leg::Internal, node_answer(180, "Ringing", "call-ringing"))
        .await;

    assert_eq!(gateway.expire_idle_calls(), 1);
    assert!(gateway.registry().get_assigned_node("call-silent").is_none());
    assert!(gateway.registry().get_assigned_node("call-ringing").is_some());
    assert_eq!(gateway.active_calls(), 1);
    assert_eq!(gateway.expire_idle_calls(), 0);
}

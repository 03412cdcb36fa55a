// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_balancer::{Leg, LegDispatcher};
use sip_core::Method;
use sip_parse::{parse_request, parse_response};
use sip_testkit::{
    as_bytes, build_bye, build_cancel, build_invite, build_options, build_response,
    response_as_bytes, RecordingDispatcher, RequestBuilder,
};

#[test]
fn built_requests_survive_the_wire() {
    for request in [
        build_invite("sip:bob@example.com", "a@client"),
        build_bye("sip:bob@example.com", "a@client"),
        build_cancel("sip:bob@example.com", "a@client"),
        build_options("sip:example.com"),
    ] {
        let parsed = parse_request(&as_bytes(&request)).expect("builder output should parse");
        assert_eq!(parsed.method(), request.method());
        assert_eq!(parsed.call_id(), request.call_id());
    }
}

#[test]
fn response_keeps_via_order() {
    let response = build_response(
        200,
        "OK",
        &[
            "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKtop",
            "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKbottom",
        ],
        "call-1",
    );
    let parsed = parse_response(&response_as_bytes(&response)).unwrap();
    assert_eq!(parsed.top_via().unwrap().branch(), Some("z9hG4bKtop"));
    assert_eq!(parsed.headers().count("Via"), 2);
}

#[test]
fn builder_options_shape_headers() {
    let request = RequestBuilder::new(Method::Subscribe, "sip:bob@example.com")
        .without_via()
        .without_call_id()
        .route("<sip:10.0.0.1;lr>")
        .header("Event", "presence")
        .cseq(7)
        .build();
    assert!(request.top_via().is_none());
    assert!(request.call_id().is_none());
    assert_eq!(request.headers().get("CSeq").unwrap().as_str(), "7 SUBSCRIBE");
    assert_eq!(request.headers().get("Event").unwrap().as_str(), "presence");
}

#[tokio::test]
async fn dispatcher_records_and_fails_on_demand() {
    let dispatcher = RecordingDispatcher::new();
    dispatcher
        .send_request(Leg::Internal, build_options("sip:example.com"))
        .await
        .unwrap();

    dispatcher.set_failing(true);
    let err = dispatcher
        .send_response(
            Leg::External,
            build_response(200, "OK", &["SIP/2.0/UDP a;branch=z9hG4bKx"], "c"),
        )
        .await;
    assert!(err.is_err());

    assert_eq!(dispatcher.requests().len(), 1);
    assert_eq!(dispatcher.responses().len(), 1);
    assert_eq!(dispatcher.last_request().unwrap().0, Leg::Internal);

    dispatcher.clear();
    assert!(dispatcher.requests().is_empty());
}

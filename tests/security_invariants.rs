//! Security invariants: session possession, ack validation, hijacking.

mod common;

use common::{ack_from_update, boot_ajax, demo_factory, get, init_test, parsed, AppProbe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use weft::http::{Method, Request, ResponseKind, ResponseWriter};
use weft::session::{Handler, SessionState};
use weft::{Configuration, Controller, SessionTracking};

fn send_click(
    controller: &Arc<Controller>,
    probe: &AppProbe,
    session_id: &str,
    ack: u32,
) -> (u16, String) {
    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", session_id)
            .param("signal", &probe.click_id())
            .param("ackId", &ack.to_string())
            .build(),
        rw,
    );
    let flushed = response.get().expect("flushed");
    (flushed.status, flushed.body)
}

#[test]
fn ack_window_tolerates_reordering_rejects_replay() {
    init_test("ack_window_tolerates_reordering_rejects_replay");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b);
    let session = controller.find_session(&boot.session_id).expect("live");

    // Advance through a few update ids.
    let a0 = boot.ack;
    let (status, body) = send_click(&controller, &probe, &boot.session_id, a0);
    assert_eq!(status, 200);
    let a1 = ack_from_update(&body);
    let (status, body) = send_click(&controller, &probe, &boot.session_id, a1);
    assert_eq!(status, 200);
    let a2 = ack_from_update(&body);
    assert_eq!(a2, a0.wrapping_add(2));

    // An ack lagging by two (a renewed poll racing an update) is accepted.
    weft::test_section!("reasonable lag");
    let (status, body) = send_click(&controller, &probe, &boot.session_id, a2.wrapping_sub(2));
    assert_eq!(status, 200);
    let a3 = ack_from_update(&body);
    let clicks_before = probe.clicks.load(Ordering::SeqCst);

    // Beyond the window: rejected, no handler runs, session survives.
    weft::test_section!("stale ack");
    let (status, _) = send_click(&controller, &probe, &boot.session_id, a3.wrapping_sub(3));
    assert_eq!(status, 403);
    assert_eq!(probe.clicks.load(Ordering::SeqCst), clicks_before);
    assert_eq!(session.state(), SessionState::Loaded);

    // An id the client cannot legitimately have (in flight) is a replay.
    weft::test_section!("in-flight ack");
    let (status, _) = send_click(&controller, &probe, &boot.session_id, a3.wrapping_add(1));
    assert_eq!(status, 403);

    // The correct ack still works afterwards.
    let (status, _) = send_click(&controller, &probe, &boot.session_id, a3);
    assert_eq!(status, 200);

    weft::test_complete!("ack_window_tolerates_reordering_rejects_replay");
}

#[test]
fn missing_ack_is_rejected() {
    init_test("missing_ack_is_rejected");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b);

    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", &probe.click_id())
            .build(),
        rw,
    );
    assert_eq!(response.get().expect("flushed").status, 403);
    assert_eq!(probe.clicks.load(Ordering::SeqCst), 0);

    weft::test_complete!("missing_ack_is_rejected");
}

#[test]
fn combined_tracking_rejects_wrong_wtd_at_the_controller() {
    init_test("combined_tracking_rejects_wrong_wtd_at_the_controller");

    let probe = Arc::new(AppProbe::default());
    let config = Configuration::default().session_tracking(SessionTracking::Combined);
    let controller = Controller::single_threaded(config, demo_factory(probe.clone()));

    let boot = boot_ajax(&controller, |b| b);
    let proof = boot.proof.clone().expect("combined tracking sets a proof");
    let cookie = format!("weftsid={}; weftproof={proof}", boot.session_id);

    // Legitimate: wtd plus both cookies.
    let (rw, ok) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", "load")
            .param("ackId", &boot.ack.to_string())
            .header("Cookie", &cookie)
            .build(),
        rw,
    );
    assert_eq!(ok.get().expect("flushed").status, 200);

    // Routed to the session by its cookie, but the URL credential is wrong.
    let (rw, bad) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", "WRONG")
            .param("signal", &probe.click_id())
            .param("ackId", &boot.ack.wrapping_add(1).to_string())
            .header("Cookie", &cookie)
            .build(),
        rw,
    );
    assert_eq!(bad.get().expect("flushed").status, 403);
    assert_eq!(probe.clicks.load(Ordering::SeqCst), 0);

    let session = controller.find_session(&boot.session_id).expect("alive");
    assert_eq!(session.state(), SessionState::Loaded);

    weft::test_complete!("combined_tracking_rejects_wrong_wtd_at_the_controller");
}

#[test]
fn user_agent_change_kills_the_session() {
    init_test("user_agent_change_kills_the_session");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b.header("User-Agent", "agent-a/1.0"));

    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", &probe.click_id())
            .param("ackId", &boot.ack.to_string())
            .header("User-Agent", "agent-b/6.6")
            .build(),
        rw,
    );
    assert_eq!(response.get().expect("flushed").status, 403);
    // The hijacked session is gone; its next request starts fresh.
    assert!(controller.find_session(&boot.session_id).is_none());

    weft::test_complete!("user_agent_change_kills_the_session");
}

#[test]
fn address_change_without_proof_kills_the_session() {
    init_test("address_change_without_proof_kills_the_session");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b.client_address("192.0.2.10"));

    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", &probe.click_id())
            .param("ackId", &boot.ack.to_string())
            .client_address("198.51.100.99")
            .build(),
        rw,
    );
    assert_eq!(response.get().expect("flushed").status, 403);
    assert!(controller.find_session(&boot.session_id).is_none());

    weft::test_complete!("address_change_without_proof_kills_the_session");
}

#[test]
fn address_change_with_proof_cookie_is_allowed() {
    init_test("address_change_with_proof_cookie_is_allowed");

    let probe = Arc::new(AppProbe::default());
    let config = Configuration::default().session_tracking(SessionTracking::Combined);
    let controller = Controller::single_threaded(config, demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b.client_address("192.0.2.10"));
    let proof = boot.proof.clone().expect("proof cookie");
    let cookie = format!("weftsid={}; weftproof={proof}", boot.session_id);

    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", "load")
            .param("ackId", &boot.ack.to_string())
            .client_address("198.51.100.99")
            .header("Cookie", &cookie)
            .build(),
        rw,
    );
    assert_eq!(response.get().expect("flushed").status, 200);
    let session = controller.find_session(&boot.session_id).expect("alive");
    assert_eq!(session.state(), SessionState::Loaded);

    weft::test_complete!("address_change_with_proof_cookie_is_allowed");
}

#[test]
fn websocket_upgrade_needs_an_established_session() {
    init_test("websocket_upgrade_needs_an_established_session");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));

    // Unknown session: rejected at the controller.
    let (rw, unknown) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", "nonexistent")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .build(),
        rw,
    );
    assert_eq!(unknown.get().expect("flushed").status, 403);
    assert_eq!(controller.session_count(), 0, "no session created");

    // JustCreated session: rejected at the session.
    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").build(), rw);
    let session_id =
        common::cookie_from(&first.get().expect("flushed").headers, "weftsid").expect("cookie");
    let session = controller.find_session(&session_id).expect("registered");

    let request = parsed(
        get("/app")
            .param("wtd", &session_id)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
    );
    let (rw, premature) = ResponseWriter::probe(ResponseKind::Update);
    {
        let mut handler = Handler::attach(&session, request, rw);
        session.handle_request(&mut handler);
    }
    assert_eq!(premature.get().expect("flushed").status, 403);

    weft::test_complete!("websocket_upgrade_needs_an_established_session");
}

#[test]
fn disallowed_method_is_a_bad_request() {
    init_test("disallowed_method_is_a_bad_request");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));
    let boot = boot_ajax(&controller, |b| b);
    let session = controller.find_session(&boot.session_id).expect("live");

    let request = parsed(
        Request::builder(Method::Put, "/app")
            .param("wtd", &boot.session_id)
            .param("signal", "load")
            .param("ackId", &boot.ack.to_string()),
    );
    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    {
        let mut handler = Handler::attach(&session, request, rw);
        session.handle_request(&mut handler);
    }
    assert_eq!(response.get().expect("flushed").status, 400);
    assert_ne!(session.state(), SessionState::Dead);

    weft::test_complete!("disallowed_method_is_a_bad_request");
}

#[test]
fn script_id_must_match() {
    init_test("script_id_must_match");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));

    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").build(), rw);
    let session_id =
        common::cookie_from(&first.get().expect("flushed").headers, "weftsid").expect("cookie");

    let (rw, response) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("request", "script")
            .param("sid", "1234567")
            .build(),
        rw,
    );
    assert_eq!(response.get().expect("flushed").status, 403);

    weft::test_complete!("script_id_must_match");
}

#[test]
fn parse_failures_do_not_create_sessions() {
    init_test("parse_failures_do_not_create_sessions");

    let probe = Arc::new(AppProbe::default());
    let controller =
        Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));

    let (rw, response) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").query("a=%4").build(), rw);
    let flushed = response.get().expect("flushed");
    assert_eq!(flushed.status, 400);
    assert!(flushed.body.contains("Error occurred."));
    assert_eq!(controller.session_count(), 0);

    weft::test_complete!("parse_failures_do_not_create_sessions");
}

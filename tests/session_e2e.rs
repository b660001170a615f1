//! End-to-end session lifecycle: bootstrap, load, events, death.

mod common;

use common::{
    ack_from_script, ack_from_update, cookie_from, demo_factory, get, init_test, parsed,
    sid_from_bootstrap, AppProbe,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use weft::http::{ResponseKind, ResponseWriter};
use weft::session::{Handler, SessionState};
use weft::{Configuration, Controller};

#[test]
fn full_session_scenario() {
    init_test("full_session_scenario");

    let probe = Arc::new(AppProbe::default());
    let controller = Controller::single_threaded(Configuration::default(), demo_factory(probe.clone()));

    // First request carries no credential: a fresh session is created and
    // the bootstrap skeleton served.
    weft::test_section!("bootstrap");
    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").build(), rw);
    let first = first.get().expect("bootstrap flushed");
    assert_eq!(first.status, 200);
    let session_id = cookie_from(&first.headers, "weftsid").expect("tracking cookie set");
    let sid = sid_from_bootstrap(&first.body);
    assert!(first.body.contains(&format!("wtd={session_id}")));
    assert_eq!(controller.session_count(), 1);

    let session = controller.find_session(&session_id).expect("registered");
    assert_eq!(session.state(), SessionState::JustCreated);

    // The follow-up script request proves script capability, starts the
    // application, and serves the main script with the random ack seed.
    weft::test_section!("script");
    let (rw, script) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("request", "script")
            .param("sid", &sid)
            .build(),
        rw,
    );
    let script = script.get().expect("script flushed");
    assert_eq!(script.status, 200);
    assert!(script.body.contains("._p_.loadHtml("));
    assert!(script.body.contains("count 0"));
    let ack0 = ack_from_script(&script.body);
    assert_eq!(session.state(), SessionState::ExpectLoad);

    // The load signal confirms the client is interactive.
    weft::test_section!("load");
    let (rw, load) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("signal", "load")
            .param("ackId", &ack0.to_string())
            .build(),
        rw,
    );
    let load = load.get().expect("load flushed");
    assert_eq!(load.status, 200);
    assert_eq!(session.state(), SessionState::Loaded);
    let ack1 = ack_from_update(&load.body);
    assert_eq!(ack1, ack0.wrapping_add(1), "update ids are monotonic");

    // A request presenting the wrong id is rejected and the session is
    // unaffected.
    weft::test_section!("wrong wtd");
    let request = parsed(
        get("/app")
            .param("wtd", "WRONG")
            .param("signal", "load")
            .param("ackId", &ack1.to_string()),
    );
    let (rw, rejected) = ResponseWriter::probe(ResponseKind::Update);
    {
        let mut handler = Handler::attach(&session, request, rw);
        session.handle_request(&mut handler);
    }
    let rejected = rejected.get().expect("rejection flushed");
    assert_eq!(rejected.status, 403);
    assert_eq!(session.state(), SessionState::Loaded);

    // A correctly acknowledged click produces exactly one update batch
    // reflecting the click's effect.
    weft::test_section!("click");
    let (rw, click) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("signal", &probe.click_id())
            .param("ackId", &ack1.to_string())
            .build(),
        rw,
    );
    let click = click.get().expect("click flushed");
    assert_eq!(click.status, 200);
    assert_eq!(probe.clicks.load(Ordering::SeqCst), 1);
    assert!(click.body.starts_with('{'), "one atomic batch");
    assert!(click.body.contains("count 1"));
    assert_eq!(ack_from_update(&click.body), ack1.wrapping_add(1));

    weft::test_complete!("full_session_scenario");
}

#[test]
fn noscript_boot_goes_straight_to_loaded() {
    init_test("noscript_boot_goes_straight_to_loaded");

    let probe = Arc::new(AppProbe::default());
    let controller = Controller::single_threaded(Configuration::default(), demo_factory(probe));

    let (rw, page) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").param("js", "no").build(), rw);
    let page = page.get().expect("page flushed");
    assert_eq!(page.status, 200);
    assert!(page.body.contains("<!DOCTYPE html>"));
    assert!(page.body.contains("count 0"));

    let session_id = cookie_from(&page.headers, "weftsid").expect("tracking cookie");
    let session = controller.find_session(&session_id).expect("registered");
    assert_eq!(session.state(), SessionState::Loaded);

    weft::test_complete!("noscript_boot_goes_straight_to_loaded");
}

#[test]
fn dead_session_requests_get_a_reload() {
    init_test("dead_session_requests_get_a_reload");

    let probe = Arc::new(AppProbe::default());
    let controller = Controller::single_threaded(Configuration::default(), demo_factory(probe));
    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").build(), rw);
    let first = first.get().expect("flushed");
    let session_id = cookie_from(&first.headers, "weftsid").expect("cookie");
    let session = controller.find_session(&session_id).expect("registered");

    assert!(session.expire(), "idle session can be killed");
    assert!(session.is_dead());

    let request = parsed(get("/app").param("wtd", &session_id));
    let (rw, reload) = ResponseWriter::probe(ResponseKind::Page);
    {
        let mut handler = Handler::attach(&session, request, rw);
        session.handle_request(&mut handler);
    }
    let reload = reload.get().expect("flushed");
    assert!(reload.body.contains("window.location.reload(true);"));

    weft::test_complete!("dead_session_requests_get_a_reload");
}

#[test]
fn session_id_regeneration_rekeys_the_table() {
    init_test("session_id_regeneration_rekeys_the_table");

    let click_id: std::sync::Arc<std::sync::Mutex<Option<String>>> =
        std::sync::Arc::new(std::sync::Mutex::new(None));
    let slot = click_id.clone();
    let factory = common::closure_factory(move |cx| {
        let root = cx.tree.root();
        let button = cx.tree.create(root, "button").expect("root");
        let id = cx.signals.connect_dynamic(button, "click", |cx, _| {
            // A privilege change (e.g. login) rotates the session id.
            cx.request_new_session_id();
        });
        *slot.lock().expect("lock") = Some(id.encode());
        Ok(())
    });

    let controller = Controller::single_threaded(Configuration::default(), factory);
    let boot = common::boot_ajax(&controller, |b| b);
    let signal = click_id.lock().expect("lock").clone().expect("started");

    let (rw, response) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("signal", &signal)
            .param("ackId", &boot.ack.to_string())
            .build(),
        rw,
    );
    let flushed = response.get().expect("flushed");
    assert_eq!(flushed.status, 200);

    let new_id = cookie_from(&flushed.headers, "weftsid").expect("rotated cookie");
    assert_ne!(new_id, boot.session_id);
    assert!(controller.find_session(&boot.session_id).is_none());
    assert!(controller.find_session(&new_id).is_some());

    weft::test_complete!("session_id_regeneration_rekeys_the_table");
}

#[test]
fn resource_streaming_with_continuation() {
    init_test("resource_streaming_with_continuation");

    struct Download {
        chunks: Vec<&'static str>,
        served: usize,
    }

    impl weft::resource::Resource for Download {
        fn handle_request(
            &mut self,
            _request: &weft::Request,
            response: &mut ResponseWriter,
            cx: &mut weft::resource::ResourceContext,
        ) -> weft::Result<()> {
            response.set_content_type("text/plain");
            response.write(self.chunks[self.served]);
            self.served += 1;
            if self.served < self.chunks.len() {
                cx.wait_for_more_data();
            }
            Ok(())
        }
    }

    let factory = common::closure_factory(|cx| {
        cx.expose_resource(
            "report",
            Box::new(Download {
                chunks: vec!["part one, ", "part two"],
                served: 0,
            }),
        );
        Ok(())
    });

    let controller = Controller::single_threaded(Configuration::default(), factory);
    let boot = common::boot_ajax(&controller, |b| b);
    let session = controller.find_session(&boot.session_id).expect("live");

    // First chunk: the resource asks to wait, the response stays open.
    let (rw, download) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("request", "resource")
            .param("resource", "report")
            .build(),
        rw,
    );
    assert!(!download.is_flushed(), "continuation keeps the response open");

    // The application signals more data; the continuation completes.
    session.queue_event(weft::session::QueuedEvent::new(
        boot.session_id.clone(),
        |cx| cx.resume_resource("report"),
    ));
    session.service_events();

    let flushed = download.get().expect("continuation completed");
    assert_eq!(flushed.body, "part one, part two");

    // An unexposed resource is a 404, not an error.
    let (rw, missing) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        get("/app")
            .param("wtd", &boot.session_id)
            .param("request", "resource")
            .param("resource", "nonexistent")
            .build(),
        rw,
    );
    assert_eq!(missing.get().expect("flushed").status, 404);

    weft::test_complete!("resource_streaming_with_continuation");
}

#[test]
fn keep_alive_refreshes_without_effects() {
    init_test("keep_alive_refreshes_without_effects");

    let probe = Arc::new(AppProbe::default());
    let controller = Controller::single_threaded(Configuration::default(), demo_factory(probe));

    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(get("/app").build(), rw);
    let first = first.get().expect("flushed");
    let session_id = cookie_from(&first.headers, "weftsid").expect("cookie");
    let sid = sid_from_bootstrap(&first.body);

    let (rw, script) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("request", "script")
            .param("sid", &sid)
            .build(),
        rw,
    );
    let ack = ack_from_script(&script.get().expect("flushed").body);

    let (rw, keep) = ResponseWriter::probe(ResponseKind::Update);
    controller.handle_request(
        get("/app")
            .param("wtd", &session_id)
            .param("signal", "keepAlive")
            .param("ackId", &ack.to_string())
            .build(),
        rw,
    );
    let keep = keep.get().expect("flushed");
    assert_eq!(keep.status, 200);

    let session = controller.find_session(&session_id).expect("registered");
    assert_ne!(session.state(), SessionState::Dead);

    weft::test_complete!("keep_alive_refreshes_without_effects");
}

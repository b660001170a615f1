//! Shared fixtures for the end-to-end suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use weft::error::Result;
use weft::http::{params, Method, Request, RequestBuilder};
use weft::render::slot::StatelessSlot;
use weft::session::{AppContext, AppFactory, Application};
use weft::widget::WidgetId;

pub fn init_test(name: &str) {
    weft::test_utils::init_test_logging();
    weft::test_phase!(name);
}

/// Observable state shared between a test and its application instances.
#[derive(Default)]
pub struct AppProbe {
    /// Encoded id of the dynamic click signal.
    pub click_signal: Mutex<Option<String>>,
    /// Encoded id of the pre-learnable toggle signal.
    pub toggle_signal: Mutex<Option<String>>,
    /// The counter label widget.
    pub label: Mutex<Option<WidgetId>>,
    /// The text input widget (a form object).
    pub input: Mutex<Option<WidgetId>>,
    /// Number of click-handler invocations.
    pub clicks: AtomicUsize,
    /// Set while a click handler body is executing (single-writer check).
    pub in_handler: AtomicBool,
    /// Set when two handler bodies were observed interleaved.
    pub overlap: AtomicBool,
}

impl AppProbe {
    pub fn click_id(&self) -> String {
        self.click_signal
            .lock()
            .expect("probe lock poisoned")
            .clone()
            .expect("application started")
    }

    pub fn toggle_id(&self) -> String {
        self.toggle_signal
            .lock()
            .expect("probe lock poisoned")
            .clone()
            .expect("application started")
    }
}

struct DemoApp {
    probe: Arc<AppProbe>,
}

impl Application for DemoApp {
    fn start(&mut self, cx: &mut AppContext<'_>) -> Result<()> {
        let root = cx.tree.root();

        let label = cx.tree.create(root, "span").expect("live root");
        cx.tree.set_text(label, "count 0");

        let input = cx.tree.create(root, "input").expect("live root");
        cx.tree.set_form_object(input, true);

        let button = cx.tree.create(root, "button").expect("live root");
        let probe = self.probe.clone();
        let click = cx.signals.connect_dynamic(button, "click", move |cx, _event| {
            if probe.in_handler.swap(true, Ordering::SeqCst) {
                probe.overlap.store(true, Ordering::SeqCst);
            }
            // Give a racing handler a chance to observe the overlap.
            std::thread::sleep(std::time::Duration::from_millis(2));
            let count = probe.clicks.fetch_add(1, Ordering::SeqCst) + 1;
            cx.tree.set_text(label, &format!("count {count}"));
            probe.in_handler.store(false, Ordering::SeqCst);
        });

        let panel = cx.tree.create(root, "div").expect("live root");
        cx.tree.set_attribute(panel, "class", "closed");
        let toggle = cx.signals.connect_stateless(
            panel,
            "click",
            StatelessSlot::with_undo(
                move |t| t.set_attribute(panel, "class", "open"),
                move |t| t.set_attribute(panel, "class", "closed"),
            ),
        );

        *self.probe.click_signal.lock().expect("probe lock poisoned") =
            Some(click.encode());
        *self.probe.toggle_signal.lock().expect("probe lock poisoned") =
            Some(toggle.encode());
        *self.probe.label.lock().expect("probe lock poisoned") = Some(label);
        *self.probe.input.lock().expect("probe lock poisoned") = Some(input);
        Ok(())
    }
}

/// Factory producing the demo application wired to `probe`.
pub fn demo_factory(probe: Arc<AppProbe>) -> AppFactory {
    Arc::new(move |_env| -> Box<dyn Application> {
        Box::new(DemoApp {
            probe: probe.clone(),
        })
    })
}

/// Builds and parses a request the way the controller would.
pub fn parsed(builder: RequestBuilder) -> Request {
    let mut request = builder.build();
    params::parse_request(&mut request, &weft::Configuration::default()).expect("parse request");
    request
}

/// Convenience GET builder.
pub fn get(path: &str) -> RequestBuilder {
    Request::builder(Method::Get, path)
}

/// Extracts the text between `prefix` and `suffix` in `body`.
pub fn extract_between(body: &str, prefix: &str, suffix: &str) -> String {
    let start = body.find(prefix).map(|i| i + prefix.len()).expect("prefix");
    let end = body[start..].find(suffix).map(|i| start + i).expect("suffix");
    body[start..end].to_owned()
}

/// The `sid` the bootstrap skeleton asks the client to fetch.
pub fn sid_from_bootstrap(body: &str) -> String {
    extract_between(body, "sid=", "\"")
}

/// The update id the client should acknowledge next, from the main script.
pub fn ack_from_script(body: &str) -> u32 {
    let args = extract_between(body, "._p_.init(", ");");
    let last = args.rsplit(',').next().expect("init arguments");
    last.trim().parse().expect("numeric ack id")
}

/// The id stamped on an update batch.
pub fn ack_from_update(body: &str) -> u32 {
    let stamped = extract_between(body, "._p_.response(", ");");
    stamped.trim().parse().expect("numeric update id")
}

/// A bootstrapped ajax session: credential, proof cookie, next ack id.
pub struct Boot {
    pub session_id: String,
    pub proof: Option<String>,
    pub ack: u32,
}

/// Drives the bootstrap handshake (skeleton page, then main script)
/// through the controller. `decorate` is applied to every request builder
/// so callers can pin headers like User-Agent or Cookie.
pub fn boot_ajax(
    controller: &std::sync::Arc<weft::Controller>,
    decorate: impl Fn(RequestBuilder) -> RequestBuilder,
) -> Boot {
    use weft::http::{ResponseKind, ResponseWriter};

    let (rw, first) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(decorate(get("/app")).build(), rw);
    let first = first.get().expect("bootstrap flushed");
    assert_eq!(first.status, 200, "bootstrap must succeed");
    let session_id =
        cookie_from(&first.headers, "weftsid").expect("tracking cookie on first response");
    let proof = cookie_from(&first.headers, "weftproof");
    let sid = sid_from_bootstrap(&first.body);

    let (rw, script) = ResponseWriter::probe(ResponseKind::Page);
    controller.handle_request(
        decorate(
            get("/app")
                .param("wtd", &session_id)
                .param("request", "script")
                .param("sid", &sid),
        )
        .build(),
        rw,
    );
    let script = script.get().expect("script flushed");
    assert_eq!(script.status, 200, "script must succeed");
    let ack = ack_from_script(&script.body);

    Boot {
        session_id,
        proof,
        ack,
    }
}

/// Runs `f` against the session's application state through the queued
/// event machinery, returning its result.
pub fn with_session_state<R: Send + 'static>(
    session: &Arc<weft::Session>,
    f: impl FnOnce(&mut AppContext<'_>) -> R + Send + 'static,
) -> R {
    use weft::session::QueuedEvent;
    let out: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
    let slot = out.clone();
    session.queue_event(QueuedEvent::new("test-probe", move |cx| {
        *slot.lock().expect("probe lock poisoned") = Some(f(cx));
    }));
    session.service_events();
    let result = out.lock().expect("probe lock poisoned").take();
    result.expect("queued probe ran")
}

/// An application whose start logic is a cloneable closure — for tests
/// that need a bespoke widget tree without a named Application type.
pub struct ClosureApp {
    start: Option<Box<dyn FnOnce(&mut AppContext<'_>) -> Result<()> + Send>>,
}

impl Application for ClosureApp {
    fn start(&mut self, cx: &mut AppContext<'_>) -> Result<()> {
        match self.start.take() {
            Some(start) => start(cx),
            None => Ok(()),
        }
    }
}

/// Factory wrapping a cloneable start closure.
pub fn closure_factory(
    build: impl Fn(&mut AppContext<'_>) -> Result<()> + Send + Sync + Clone + 'static,
) -> AppFactory {
    Arc::new(move |_env| -> Box<dyn Application> {
        let build = build.clone();
        Box::new(ClosureApp {
            start: Some(Box::new(build)),
        })
    })
}

/// The value of a Set-Cookie header, if present.
pub fn cookie_from(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .filter(|(n, _)| n == "Set-Cookie")
        .find_map(|(_, v)| {
            v.split(';')
                .next()
                .and_then(|pair| pair.strip_prefix(name))
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_owned)
        })
}

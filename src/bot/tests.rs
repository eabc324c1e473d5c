//! End-to-end routing tests over an in-memory store, a recording outbound
//! fake, and a scripted assistant.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::assistant::{self, Assistant};
use super::catalog::Catalog;
use super::memory::{Role, Turn};
use super::normalize::{InboundMessage, MessageKind, canonical_user_id};
use super::router::{ConversationRouter, RouterSettings};
use super::session::SessionState;
use super::store::Store;
use super::whatsapp::Outbound;

const OPERATOR: &str = "529990001111";

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text { to: String, body: String },
    Buttons { to: String, body: String, buttons: Vec<String> },
    Image { to: String },
}

/// Records every outbound call instead of hitting the Cloud API.
struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingOutbound {
    fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }

    fn all(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn send_buttons(&self, to: &str, body: &str, buttons: &[String]) -> Result<(), String> {
        self.sent.lock().unwrap().push(Sent::Buttons {
            to: to.to_string(),
            body: body.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(())
    }

    async fn send_image(&self, to: &str, _link: &str, _caption: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push(Sent::Image { to: to.to_string() });
        Ok(())
    }
}

/// Returns a canned reply and records the window it was asked about.
struct FakeAssistant {
    canned: String,
    windows: Mutex<Vec<Vec<(Role, String)>>>,
}

impl FakeAssistant {
    fn new(canned: &str) -> Self {
        Self {
            canned: canned.to_string(),
            windows: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    fn last_window(&self) -> Vec<(Role, String)> {
        self.windows.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Assistant for FakeAssistant {
    async fn reply(&self, _persona: &str, turns: &[Turn]) -> Result<String, assistant::Error> {
        // Suspend like a real network call so concurrent handlers get a
        // chance to interleave here.
        tokio::task::yield_now().await;
        self.windows
            .lock()
            .unwrap()
            .push(turns.iter().map(|t| (t.role, t.content.clone())).collect());
        Ok(self.canned.clone())
    }
}

struct FailingAssistant;

#[async_trait]
impl Assistant for FailingAssistant {
    async fn reply(&self, _persona: &str, _turns: &[Turn]) -> Result<String, assistant::Error> {
        Err(assistant::Error::Api("503: overloaded".to_string()))
    }
}

struct Harness {
    store: Arc<Store>,
    outbound: Arc<RecordingOutbound>,
    router: Arc<ConversationRouter>,
}

fn harness(capture_service: bool, assistant: Arc<dyn Assistant>) -> Harness {
    let store = Arc::new(Store::in_memory().unwrap());
    let outbound = Arc::new(RecordingOutbound::new());
    let router = Arc::new(ConversationRouter::new(
        store.clone(),
        Catalog::default(),
        outbound.clone(),
        assistant,
        RouterSettings {
            persona: "Asistente de prueba".to_string(),
            context_window: 6,
            operator_number: Some(OPERATOR.to_string()),
            capture_service,
        },
    ));
    Harness { store, outbound, router }
}

fn text(user: &str, body: &str) -> InboundMessage {
    InboundMessage {
        user_id: user.to_string(),
        kind: MessageKind::Text,
        text: body.to_string(),
    }
}

fn choice(user: &str, title: &str) -> InboundMessage {
    InboundMessage {
        user_id: user.to_string(),
        kind: MessageKind::Choice,
        text: title.to_string(),
    }
}

const USER: &str = "525512345678";

#[tokio::test]
async fn test_greeting_sends_menu_and_creates_session() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));
    h.router.handle(text(USER, "hola")).await;

    let sent = h.outbound.all();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Buttons { to, buttons, .. } => {
            assert_eq!(to, USER);
            assert_eq!(buttons.len(), 3);
        }
        other => panic!("expected menu buttons, got {other:?}"),
    }

    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Start);
}

#[tokio::test]
async fn test_full_booking_flow() {
    let assistant = Arc::new(FakeAssistant::new("ok"));
    let h = harness(true, assistant.clone());

    h.router.handle(text(USER, "quiero una cita")).await;
    assert_eq!(
        h.store.find_session(USER).unwrap().unwrap().state,
        SessionState::AwaitingName
    );

    h.router.handle(text(USER, "maria lopez")).await;
    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::AwaitingService);
    assert_eq!(session.saved_name.as_deref(), Some("Maria Lopez"));

    h.router.handle(choice(USER, "Soporte")).await;
    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Start);
    assert_eq!(session.saved_name.as_deref(), Some("Maria Lopez"));

    let sent = h.outbound.all();
    // name prompt, service buttons, confirmation, operator alert
    assert_eq!(sent.len(), 4);
    match &sent[1] {
        Sent::Buttons { body, buttons, .. } => {
            assert!(body.contains("Maria Lopez"));
            assert_eq!(buttons.len(), 3);
        }
        other => panic!("expected service buttons, got {other:?}"),
    }
    match &sent[2] {
        Sent::Text { to, body } => {
            assert_eq!(to, USER);
            assert!(body.contains("Maria Lopez"));
            assert!(body.contains("Soporte"));
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    match &sent[3] {
        Sent::Text { to, body } => {
            assert_eq!(to, OPERATOR);
            assert!(body.contains("Maria Lopez"));
            assert!(body.contains(USER));
        }
        other => panic!("expected operator alert, got {other:?}"),
    }

    // Guided-flow traffic never reaches the assistant.
    assert_eq!(assistant.calls(), 0);
}

#[tokio::test]
async fn test_short_flow_skips_service_step() {
    let h = harness(false, Arc::new(FakeAssistant::new("ok")));

    h.router.handle(text(USER, "agendar")).await;
    h.router.handle(text(USER, "juan")).await;

    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Start);
    assert_eq!(session.saved_name.as_deref(), Some("Juan"));

    let sent = h.outbound.all();
    // name prompt, thanks, operator alert
    assert_eq!(sent.len(), 3);
    match &sent[1] {
        Sent::Text { body, .. } => assert!(body.contains("Juan")),
        other => panic!("expected closing message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_blank_name_reprompts_without_advancing() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));

    h.router.handle(text(USER, "agendar")).await;
    h.router.handle(text(USER, "   ")).await;

    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::AwaitingName);

    let sent = h.outbound.all();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test]
async fn test_free_text_goes_to_assistant_with_window() {
    let assistant = Arc::new(FakeAssistant::new("Cerramos a las 8pm."));
    let h = harness(true, assistant.clone());

    h.router.handle(text(USER, "¿a qué hora cierran?")).await;

    let sent = h.outbound.all();
    assert_eq!(
        sent,
        vec![Sent::Text {
            to: USER.to_string(),
            body: "Cerramos a las 8pm.".to_string(),
        }]
    );

    // The just-arrived user message is the last entry of the window.
    let window = assistant.last_window();
    assert_eq!(window.last().unwrap(), &(Role::User, "¿a qué hora cierran?".to_string()));

    // Both sides of the exchange are durable.
    let turns = h.store.recent_turns(USER, 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Cerramos a las 8pm.");
}

#[tokio::test]
async fn test_assistant_window_is_bounded() {
    let assistant = Arc::new(FakeAssistant::new("ok"));
    let h = harness(true, assistant.clone());

    for i in 0..8 {
        h.router.handle(text(USER, &format!("pregunta {i}"))).await;
    }

    let window = assistant.last_window();
    assert_eq!(window.len(), 6);
    assert_eq!(window.last().unwrap().1, "pregunta 7");
}

#[tokio::test]
async fn test_assistant_failure_sends_fallback() {
    let h = harness(true, Arc::new(FailingAssistant));

    h.router.handle(text(USER, "¿tienen estacionamiento?")).await;

    let sent = h.outbound.all();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Text { body, .. } => assert!(body.contains("Disculpa")),
        other => panic!("expected fallback text, got {other:?}"),
    }

    // The fallback is recorded as what the user actually received.
    let turns = h.store.recent_turns(USER, 10).unwrap();
    assert_eq!(turns.last().unwrap().role, Role::Assistant);
    assert!(turns.last().unwrap().content.contains("Disculpa"));
}

#[tokio::test]
async fn test_unknown_choice_never_reaches_assistant() {
    let assistant = Arc::new(FakeAssistant::new("ok"));
    let h = harness(true, assistant.clone());

    h.router.handle(choice(USER, "Opción Vieja")).await;

    assert_eq!(assistant.calls(), 0);
    let sent = h.outbound.all();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Text { body, .. } => assert!(body.contains("No entendí")),
        other => panic!("expected unknown-option reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_menu_button_choice_dispatches_action() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));

    h.router.handle(choice(USER, "💰 Precios")).await;

    let sent = h.outbound.all();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Text { body, .. } => assert!(body.contains("precios")),
        other => panic!("expected prices text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_routing_prefix_variants_share_a_session() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));

    h.router
        .handle(text(&canonical_user_id("5215512345678"), "agendar"))
        .await;
    h.router
        .handle(text(&canonical_user_id("525512345678"), "maria"))
        .await;

    assert_eq!(h.store.session_count(), 1);
    let session = h.store.find_session("525512345678").unwrap().unwrap();
    assert_eq!(session.state, SessionState::AwaitingService);
    assert_eq!(session.saved_name.as_deref(), Some("Maria"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_for_one_user_are_serialized() {
    let assistant = Arc::new(FakeAssistant::new("ok"));
    let h = harness(true, assistant.clone());

    let mut handles = Vec::new();
    for i in 0..4 {
        let router = h.router.clone();
        handles.push(tokio::spawn(async move {
            router.handle(text(USER, &format!("pregunta {i}"))).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Each event appends its user turn and its assistant turn as one unit;
    // interleaving between events would break the alternation.
    let turns = h.store.recent_turns(USER, 20).unwrap();
    assert_eq!(turns.len(), 8);
    for (i, turn) in turns.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected, "turn {i} out of order");
    }
    for pair in turns.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }

    assert_eq!(assistant.calls(), 4);
    assert_eq!(h.store.session_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flow_starts_lose_no_transition() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));

    // Two deliveries of the same booking request race. Whichever runs first
    // moves Start -> AwaitingName; the other must then be read against
    // AwaitingName and captured as the name, never re-applied to Start.
    let first = {
        let router = h.router.clone();
        tokio::spawn(async move { router.handle(text(USER, "quiero una cita")).await })
    };
    let second = {
        let router = h.router.clone();
        tokio::spawn(async move { router.handle(text(USER, "quiero una cita")).await })
    };
    first.await.unwrap();
    second.await.unwrap();

    let session = h.store.find_session(USER).unwrap().unwrap();
    assert_eq!(session.state, SessionState::AwaitingService);
    assert_eq!(session.saved_name.as_deref(), Some("Quiero Una Cita"));
    assert_eq!(h.store.session_count(), 1);
}

#[tokio::test]
async fn test_users_are_isolated() {
    let h = harness(true, Arc::new(FakeAssistant::new("ok")));

    h.router.handle(text("525511111111", "agendar")).await;
    h.router.handle(text("525522222222", "hola")).await;

    assert_eq!(
        h.store.find_session("525511111111").unwrap().unwrap().state,
        SessionState::AwaitingName
    );
    assert_eq!(
        h.store.find_session("525522222222").unwrap().unwrap().state,
        SessionState::Start
    );
}

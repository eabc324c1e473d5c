//! Per-user conversation routing.
//!
//! Every inbound message lands here and is dispatched on the user's durable
//! session state: menu keywords and the guided booking flow are handled with
//! fixed copy, everything else goes to the assistant with a window of recent
//! turns. Events for the same user are serialized behind a per-user lock;
//! different users proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::bot::assistant::Assistant;
use crate::bot::catalog::{Catalog, render};
use crate::bot::memory::Role;
use crate::bot::normalize::{InboundMessage, MessageKind};
use crate::bot::session::{Session, SessionState};
use crate::bot::store::Store;
use crate::bot::whatsapp::Outbound;

/// Sent when the assistant fails; logged as a normal assistant turn so the
/// record shows what the user actually received.
const FALLBACK_REPLY: &str =
    "Disculpa, tuve un problema para responder. Intenta de nuevo en un momento.";

/// Menu actions reachable by keyword or button from the `Start` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    StartFlow,
    Welcome,
    Prices,
    Location,
}

/// Keyword table, checked in order; the first matching keyword wins, so
/// booking intent beats a greeting in the same message.
const MENU_RULES: &[(&[&str], MenuAction)] = &[
    (&["agendar", "cita"], MenuAction::StartFlow),
    (&["hola", "menu", "menú", "buenas"], MenuAction::Welcome),
    (&["precio"], MenuAction::Prices),
    (&["ubicacion", "ubicación", "donde", "dónde"], MenuAction::Location),
];

fn match_rule(text: &str) -> Option<MenuAction> {
    let lower = text.to_lowercase();
    for (keywords, action) in MENU_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Some(*action);
        }
    }
    None
}

/// "maria lopez" -> "Maria Lopez". Captured names are stored and echoed in
/// this form.
fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// What a guided-flow step captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotCapture {
    Name,
    Service,
}

/// One step of the guided booking flow: the state that waits for input and
/// what that input fills.
#[derive(Debug, Clone, Copy)]
struct FlowSlot {
    state: SessionState,
    capture: SlotCapture,
}

/// The flow always asks for a name; the service step is configurable, which
/// yields the short (name-only) and full (name + service) variants.
fn build_flow(capture_service: bool) -> Vec<FlowSlot> {
    let mut flow = vec![FlowSlot {
        state: SessionState::AwaitingName,
        capture: SlotCapture::Name,
    }];
    if capture_service {
        flow.push(FlowSlot {
            state: SessionState::AwaitingService,
            capture: SlotCapture::Service,
        });
    }
    flow
}

/// One lock per user id, created lazily. Holding the user's lock across the
/// whole event guarantees read-state / act / write-state is atomic per user.
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn for_user(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct RouterSettings {
    pub persona: String,
    pub context_window: usize,
    pub operator_number: Option<String>,
    pub capture_service: bool,
}

pub struct ConversationRouter {
    store: Arc<Store>,
    catalog: Catalog,
    outbound: Arc<dyn Outbound>,
    assistant: Arc<dyn Assistant>,
    persona: String,
    context_window: usize,
    operator_number: Option<String>,
    flow: Vec<FlowSlot>,
    locks: UserLocks,
}

impl ConversationRouter {
    pub fn new(
        store: Arc<Store>,
        catalog: Catalog,
        outbound: Arc<dyn Outbound>,
        assistant: Arc<dyn Assistant>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            outbound,
            assistant,
            persona: settings.persona,
            context_window: settings.context_window,
            operator_number: settings.operator_number,
            flow: build_flow(settings.capture_service),
            locks: UserLocks::new(),
        }
    }

    /// Handle one inbound message end to end. Never returns an error: every
    /// failure path degrades to a logged warning or a fallback reply.
    pub async fn handle(&self, msg: InboundMessage) {
        let lock = self.locks.for_user(&msg.user_id);
        let _guard = lock.lock().await;

        let session = match self.store.get_or_create(&msg.user_id) {
            Ok(session) => session,
            Err(e) => {
                // Degrade to a one-off Start session rather than going silent.
                warn!("Session read failed for {}: {e}", msg.user_id);
                Session::transient(&msg.user_id)
            }
        };

        info!(
            "📨 {} [{}]: {}",
            msg.user_id,
            session.state.as_str(),
            msg.text
        );

        match self.flow.iter().position(|slot| slot.state == session.state) {
            Some(idx) if session.state != SessionState::Start => {
                self.advance_flow(&session, &msg, idx).await;
            }
            _ => self.route_start(&msg).await,
        }
    }

    async fn route_start(&self, msg: &InboundMessage) {
        if let Some(action) = match_rule(&msg.text) {
            self.log_exchange(&msg.user_id, &msg.text, None);
            self.run_menu_action(&msg.user_id, action).await;
            return;
        }

        match msg.kind {
            // Button ids the menu no longer offers land here; buttons never
            // reach the assistant.
            MessageKind::Choice => {
                self.log_exchange(&msg.user_id, &msg.text, Some(&self.catalog.unknown_reply));
                self.send_text(&msg.user_id, &self.catalog.unknown_reply).await;
            }
            MessageKind::Text => self.assist(msg).await,
        }
    }

    async fn run_menu_action(&self, user_id: &str, action: MenuAction) {
        match action {
            MenuAction::StartFlow => {
                // State is durable before the prompt goes out.
                self.persist(user_id, self.flow[0].state, None);
                self.send_text(user_id, &self.catalog.name_prompt).await;
            }
            MenuAction::Welcome => {
                if let Err(e) = self
                    .outbound
                    .send_buttons(user_id, &self.catalog.welcome, &self.catalog.menu_buttons)
                    .await
                {
                    warn!("Menu send to {user_id} failed: {e}");
                }
            }
            MenuAction::Prices => {
                if self.catalog.prices_image.is_empty() {
                    self.send_text(user_id, &self.catalog.prices_caption).await;
                } else if let Err(e) = self
                    .outbound
                    .send_image(user_id, &self.catalog.prices_image, &self.catalog.prices_caption)
                    .await
                {
                    warn!("Prices send to {user_id} failed: {e}");
                }
            }
            MenuAction::Location => {
                self.send_text(user_id, &self.catalog.location).await;
            }
        }
    }

    async fn advance_flow(&self, session: &Session, msg: &InboundMessage, idx: usize) {
        let captured = title_case(&msg.text);
        if captured.is_empty() {
            // Blank input re-prompts without moving the machine.
            let prompt = self.slot_prompt(idx, session.saved_name.as_deref());
            self.send_slot_prompt(&msg.user_id, idx, &prompt).await;
            return;
        }

        self.log_exchange(&msg.user_id, &msg.text, None);

        match self.flow[idx].capture {
            SlotCapture::Name => {
                if let Some(next) = self.flow.get(idx + 1) {
                    self.persist(&msg.user_id, next.state, Some(&captured));
                    let prompt = self.slot_prompt(idx + 1, Some(&captured));
                    self.send_slot_prompt(&msg.user_id, idx + 1, &prompt).await;
                } else {
                    self.finalize(&msg.user_id, &captured, None).await;
                }
            }
            SlotCapture::Service => {
                let name = session.saved_name.clone().unwrap_or_else(|| captured.clone());
                self.finalize(&msg.user_id, &name, Some(&captured)).await;
            }
        }
    }

    fn slot_prompt(&self, idx: usize, name: Option<&str>) -> String {
        match self.flow.get(idx).map(|slot| slot.capture) {
            Some(SlotCapture::Service) => {
                render(&self.catalog.service_prompt, &[("name", name.unwrap_or(""))])
            }
            _ => self.catalog.name_prompt.clone(),
        }
    }

    async fn send_slot_prompt(&self, user_id: &str, idx: usize, prompt: &str) {
        let is_service = matches!(
            self.flow.get(idx).map(|slot| slot.capture),
            Some(SlotCapture::Service)
        );
        if is_service {
            if let Err(e) = self
                .outbound
                .send_buttons(user_id, prompt, &self.catalog.services)
                .await
            {
                warn!("Prompt send to {user_id} failed: {e}");
            }
        } else {
            self.send_text(user_id, prompt).await;
        }
    }

    /// Close the guided flow: persist completion, confirm to the user, and
    /// alert the operator. The operator alert is best-effort.
    async fn finalize(&self, user_id: &str, name: &str, service: Option<&str>) {
        self.persist(user_id, SessionState::Start, Some(name));

        let reply = match service {
            Some(service) => render(
                &self.catalog.confirmation,
                &[("name", name), ("service", service)],
            ),
            None => render(&self.catalog.thanks, &[("name", name)]),
        };
        self.log_exchange(user_id, "", Some(&reply));
        self.send_text(user_id, &reply).await;

        info!("✅ Booking captured for {user_id}: {name} / {:?}", service);

        if let Some(operator) = &self.operator_number {
            let alert = render(
                &self.catalog.operator_alert,
                &[("name", name), ("user", user_id), ("service", service.unwrap_or("-"))],
            );
            if let Err(e) = self.outbound.send_text(operator, &alert).await {
                warn!("Operator alert failed: {e}");
            }
        }
    }

    /// Free-form path: log the user turn, build the recent window, ask the
    /// assistant, and always answer something.
    async fn assist(&self, msg: &InboundMessage) {
        if let Err(e) = self.store.append_turn(&msg.user_id, Role::User, &msg.text) {
            warn!("Turn write failed for {}: {e}", msg.user_id);
        }

        let window = match self.store.recent_turns(&msg.user_id, self.context_window) {
            Ok(turns) if !turns.is_empty() => turns,
            Ok(_) | Err(_) => vec![crate::bot::memory::Turn {
                user_id: msg.user_id.clone(),
                role: Role::User,
                content: msg.text.clone(),
                created_at: 0,
            }],
        };

        let reply = match self.assistant.reply(&self.persona, &window).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Assistant failed for {}: {e}", msg.user_id);
                FALLBACK_REPLY.to_string()
            }
        };

        if let Err(e) = self.store.append_turn(&msg.user_id, Role::Assistant, &reply) {
            warn!("Turn write failed for {}: {e}", msg.user_id);
        }
        self.send_text(&msg.user_id, &reply).await;
    }

    /// Record a scripted exchange in the turn log so the audit trail covers
    /// menu and guided-flow traffic, not just assistant chats.
    fn log_exchange(&self, user_id: &str, user_text: &str, reply: Option<&str>) {
        if !user_text.is_empty() {
            if let Err(e) = self.store.append_turn(user_id, Role::User, user_text) {
                warn!("Turn write failed for {user_id}: {e}");
            }
        }
        if let Some(reply) = reply {
            if let Err(e) = self.store.append_turn(user_id, Role::Assistant, reply) {
                warn!("Turn write failed for {user_id}: {e}");
            }
        }
    }

    fn persist(&self, user_id: &str, state: SessionState, name: Option<&str>) {
        if let Err(e) = self.store.update(user_id, state, name) {
            warn!("Session write failed for {user_id}: {e}");
        }
    }

    async fn send_text(&self, user_id: &str, body: &str) {
        if let Err(e) = self.outbound.send_text(user_id, body).await {
            warn!("Send to {user_id} failed: {e}");
        }
    }
}

//! Application state shared by every handler

use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Config;
use crate::conversations::{BotResponder, ConversationService};
use crate::store::{ConversationStore, Directory};
use crate::tenancy::{TenantCache, TenantResolver};
use crate::websocket::{
    ConnectionAuthenticator, ConnectionGate, DeliveryScheduler, GateConfig, PresenceTracker,
    RoomRouter, WebSocketState,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: Arc<JwtManager>,
    pub tenants: TenantResolver,
    pub service: Arc<ConversationService>,
    pub ws_state: WebSocketState,
    pub router: Arc<RoomRouter>,
    pub presence: Arc<PresenceTracker>,
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub gate: Arc<ConnectionGate>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ConversationStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let jwt = Arc::new(JwtManager::new(
            &config.jwt_secret,
            config.jwt_expiry_hours,
            config.visitor_token_expiry_days,
        ));
        let tenants = TenantResolver::new(
            Arc::clone(&directory),
            Arc::new(TenantCache::with_ttl(config.tenant_cache_ttl())),
        );
        let service = Arc::new(ConversationService::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            BotResponder::new(config.bot_reply_text.clone()),
            config.max_message_length,
        ));

        let ws_state = WebSocketState::new();
        let delivery = DeliveryScheduler::new(
            store,
            Arc::clone(&ws_state.rooms),
            config.delivery_delay(),
        );
        let router = Arc::new(RoomRouter::new(
            Arc::clone(&service),
            ws_state.clone(),
            delivery,
        ));
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&directory),
            ws_state.clone(),
        ));

        let gate = Arc::new(ConnectionGate::new(GateConfig {
            window: config.connect_window(),
            max_attempts: config.ws_connect_max_attempts,
        }));
        let authenticator = Arc::new(ConnectionAuthenticator::new(
            Arc::clone(&jwt),
            directory,
            tenants.clone(),
            Arc::clone(&gate),
        ));

        Self {
            config: Arc::new(config),
            jwt,
            tenants,
            service,
            ws_state,
            router,
            presence,
            authenticator,
            gate,
        }
    }

    /// Drop expired gate windows, tenant cache entries and idle conversation locks
    pub fn run_maintenance(&self) {
        let gate_windows = self.gate.cleanup();
        self.tenants.cache().cleanup();
        let locks = self.service.locks().prune();

        tracing::debug!(
            gate_windows,
            locks,
            tenant_cache_entries = self.tenants.cache().len(),
            "Periodic maintenance finished"
        );
    }
}

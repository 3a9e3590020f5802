//! Realtime handshake authentication
//!
//! A connection presents either a signed token or a widget identity key.
//! Every tenant id the connection will ever act under comes from here.

use std::net::IpAddr;
use std::sync::Arc;

use chatdesk_shared::{ChatError, ChatResult};
use serde::Deserialize;
use uuid::Uuid;

use super::connection::Principal;
use super::gate::ConnectionGate;
use crate::auth::{Claims, JwtError, JwtManager, TokenType};
use crate::store::Directory;
use crate::tenancy::TenantResolver;

/// Handshake parameters, read from the upgrade request's query string
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Handshake {
    pub token: Option<String>,
    #[serde(rename = "websiteAPIKey")]
    pub website_api_key: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    /// Room to join right after connecting
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<Uuid>,
    /// Only honored together with the visitor's own `sessionId`
    #[serde(rename = "visitorId")]
    pub visitor_id: Option<Uuid>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Verified identity of a new connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub tenant_id: Uuid,
    pub principal: Principal,
}

pub struct ConnectionAuthenticator {
    jwt: Arc<JwtManager>,
    directory: Arc<dyn Directory>,
    tenants: TenantResolver,
    gate: Arc<ConnectionGate>,
}

impl ConnectionAuthenticator {
    pub fn new(
        jwt: Arc<JwtManager>,
        directory: Arc<dyn Directory>,
        tenants: TenantResolver,
        gate: Arc<ConnectionGate>,
    ) -> Self {
        Self {
            jwt,
            directory,
            tenants,
            gate,
        }
    }

    /// Gate the attempt, then verify whichever credential was presented.
    ///
    /// A token takes precedence over a widget key when both are present.
    pub async fn authenticate(
        &self,
        addr: IpAddr,
        handshake: &Handshake,
    ) -> ChatResult<Authenticated> {
        self.gate.check(addr)?;

        if let Some(token) = present(&handshake.token) {
            return self.authenticate_token(token).await;
        }

        if let Some(api_key) = present(&handshake.website_api_key) {
            return self.authenticate_widget(api_key, handshake).await;
        }

        if self.gate.note_missing_credentials(addr) {
            tracing::warn!(client_ip = %addr, "WebSocket handshake without credentials");
        }
        Err(ChatError::AuthenticationRequired)
    }

    async fn authenticate_token(&self, token: &str) -> ChatResult<Authenticated> {
        let claims = self.jwt.validate_token(token).map_err(|e| {
            tracing::debug!(error = %e, "WebSocket token rejected");
            match e {
                JwtError::Expired => ChatError::InvalidCredential("Token expired".to_string()),
                _ => ChatError::InvalidCredential("Invalid token".to_string()),
            }
        })?;

        match claims.token_type {
            TokenType::Access => self.authenticate_agent(claims).await,
            TokenType::Visitor => self.authenticate_visitor_token(claims).await,
        }
    }

    async fn authenticate_agent(&self, claims: Claims) -> ChatResult<Authenticated> {
        let agent = self
            .directory
            .find_agent(claims.sub)
            .await?
            .ok_or_else(|| ChatError::InvalidCredential("User not found".to_string()))?;

        if agent.tenant_id != claims.tenant_id {
            tracing::warn!(
                user_id = %agent.id,
                token_tenant = %claims.tenant_id,
                "Token tenant does not match user tenant"
            );
            return Err(ChatError::InvalidCredential("Invalid token".to_string()));
        }

        self.tenants.require_active(agent.tenant_id).await?;

        Ok(Authenticated {
            tenant_id: agent.tenant_id,
            principal: Principal::Agent {
                user_id: agent.id,
                name: agent.name,
                email: agent.email,
            },
        })
    }

    async fn authenticate_visitor_token(&self, claims: Claims) -> ChatResult<Authenticated> {
        let visitor = self
            .directory
            .find_visitor(claims.tenant_id, claims.sub)
            .await?
            .ok_or_else(|| ChatError::InvalidCredential("Unknown visitor".to_string()))?;

        self.tenants.require_active(visitor.tenant_id).await?;

        Ok(Authenticated {
            tenant_id: visitor.tenant_id,
            principal: Principal::Visitor {
                widget_key: None,
                visitor_id: Some(visitor.id),
                session_id: Some(visitor.session_id),
            },
        })
    }

    /// Widget-key sessions prove a visitor identity through `sessionId`.
    ///
    /// A `visitorId` is only accepted when it matches the session's visitor;
    /// on its own it leaves the session anonymous.
    async fn authenticate_widget(
        &self,
        api_key: &str,
        handshake: &Handshake,
    ) -> ChatResult<Authenticated> {
        let tenant_id = self.tenants.resolve_widget_key(api_key).await?;
        let session_id = present(&handshake.session_id).map(str::to_string);

        let session_visitor = match session_id.as_deref() {
            Some(session_id) => self
                .directory
                .find_visitor_by_session(tenant_id, session_id)
                .await?
                .map(|visitor| visitor.id),
            None => None,
        };

        let visitor_id = match (handshake.visitor_id, session_visitor) {
            (Some(claimed), Some(resolved)) if claimed != resolved => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    claimed_visitor_id = %claimed,
                    "Handshake visitor id does not match its session"
                );
                return Err(ChatError::InvalidCredential("Unknown visitor".to_string()));
            }
            (Some(claimed), None) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    claimed_visitor_id = %claimed,
                    "Visitor id without a matching session, connecting anonymously"
                );
                None
            }
            (_, resolved) => resolved,
        };

        Ok(Authenticated {
            tenant_id,
            principal: Principal::Visitor {
                widget_key: Some(api_key.to_string()),
                visitor_id,
                session_id,
            },
        })
    }
}

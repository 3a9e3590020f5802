//! Authentication module for Chatdesk

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
pub use middleware::{
    require_agent, require_visitor, require_widget, AuthAgent, AuthVisitor, WidgetContext,
};

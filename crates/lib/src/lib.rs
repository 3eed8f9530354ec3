//! HITL bridge library: hands bot conversations over to an external ticketing
//! service and relays the human agent's side back into the bot host.
//!
//! Outbound: [`relay::OutboundRelay`] turns host actions into wire envelopes.
//! Inbound: [`dispatch::InboundDispatcher`] turns webhook calls into host
//! messages and events. [`identity`] keeps host entities and remote ids bound.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod host;
pub mod identity;
pub mod init;
pub mod relay;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

/*!
# Vigil DevKit - Helpers for collector development

Library used by integration tests and local tooling:
- Payload builders matching the agent and operator wire formats
- REST client for the collector API
- WebSocket push client for observers and terminal links
- Test harness with frame recording and status polling
*/

pub mod client;
pub mod payloads;
pub mod test_utils;

pub use client::{CollectorClient, PushClient};
pub use payloads::PayloadBuilder;
pub use test_utils::TestHarness;

//! SoftAP configuration portal.
//!
//! Wildcard DNS plus a three-route HTTP surface serving one prerendered page.

mod buffer;
mod dns;
mod handlers;
pub mod html;
#[cfg(target_os = "espidf")]
mod server;

pub use buffer::RenderBuffer;
pub use dns::DnsResponder;
pub use handlers::{Reply, Router, SubmitError, CONFIG_PATH, SERVED_METHODS};
pub use html::{Directory, TemplateSource};
#[cfg(target_os = "espidf")]
pub use server::{mount_spiffs, EspPlatform};

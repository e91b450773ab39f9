use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::port::Contact;

/// Maps port names to network addresses. Failures here are surfaced unchanged to the
///  caller of `open` / `connect_output` and are not retried automatically.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NameResolver: Send + Sync + 'static {
    async fn resolve(&self, name: &str) -> anyhow::Result<Contact>;

    /// Fails on a registration conflict (the name is already taken).
    async fn register(&self, name: &str, contact: Contact) -> anyhow::Result<()>;

    async fn unregister(&self, name: &str);
}

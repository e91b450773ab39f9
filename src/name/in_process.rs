use anyhow::bail;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::port::Contact;

use super::resolver::NameResolver;

/// Name resolution for ports living in one process: a plain map under a lock.
#[derive(Default)]
pub struct InProcessResolver {
    entries: Mutex<FxHashMap<String, Contact>>,
}

impl InProcessResolver {
    pub fn new() -> InProcessResolver {
        InProcessResolver::default()
    }
}

#[async_trait]
impl NameResolver for InProcessResolver {
    async fn resolve(&self, name: &str) -> anyhow::Result<Contact> {
        match self.entries.lock().unwrap().get(name) {
            Some(contact) => Ok(contact.clone()),
            None => bail!("port name {:?} not found", name),
        }
    }

    async fn register(&self, name: &str, contact: Contact) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            bail!("port name {:?} is already registered", name);
        }
        debug!("registered {:?} at {}", name, contact);
        entries.insert(name.to_string(), contact);
        Ok(())
    }

    async fn unregister(&self, name: &str) {
        self.entries.lock().unwrap().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_resolve_unregister() {
        let resolver = InProcessResolver::new();
        let contact = Contact::new("127.0.0.1", 9000);

        resolver.register("/sensor", contact.clone()).await.unwrap();
        assert_eq!(resolver.resolve("/sensor").await.unwrap(), contact);

        // conflict
        assert!(resolver.register("/sensor", Contact::new("127.0.0.1", 9001)).await.is_err());

        resolver.unregister("/sensor").await;
        assert!(resolver.resolve("/sensor").await.is_err());
    }
}

//! Service registry.
//!
//! Registrations are keyed by SAP and by service name. A SAP can host one
//! service, and a service name resolves to one SAP, so a new registration
//! conflicting on either is refused.

use std::sync::Arc;

use super::Service;
use crate::error::{Error, Result};
use crate::{ClientId, Sap, SocketId};

pub struct Registration {
    pub client: ClientId,
    pub sap: Sap,
    pub san: Option<String>,
    pub service: Arc<dyn Service>,
    /// Listening socket while a link is up
    pub listener: Option<SocketId>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("client", &self.client)
            .field("sap", &self.sap)
            .field("san", &self.san)
            .field("service", &self.service.name())
            .field("listener", &self.listener)
            .finish()
    }
}

impl Registration {
    fn matches(&self, client: ClientId, sap: Sap, san: Option<&str>) -> bool {
        self.client == client && self.sap == sap && self.san.as_deref() == san
    }
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: Vec<Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration, returning its index.
    pub fn register(&mut self, registration: Registration) -> Result<usize> {
        let conflict = self.entries.iter().any(|r| {
            r.sap == registration.sap
                || (r.san.is_some() && r.san.as_deref() == registration.san.as_deref())
        });
        if conflict {
            return Err(Error::AlreadyRegistered);
        }
        self.entries.push(registration);
        Ok(self.entries.len() - 1)
    }

    pub fn unregister(&mut self, client: ClientId, sap: Sap, san: Option<&str>) -> Result<Registration> {
        let index = self
            .entries
            .iter()
            .position(|r| r.matches(client, sap, san))
            .ok_or(Error::NotRegistered)?;
        Ok(self.entries.remove(index))
    }

    /// Remove every registration owned by `client`.
    pub fn remove_client(&mut self, client: ClientId) -> Vec<Registration> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|r| r.client == client);
        self.entries = kept;
        removed
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Registration> {
        self.entries.get_mut(index)
    }

    pub fn by_listener(&self, listener: SocketId) -> Option<&Registration> {
        self.entries.iter().find(|r| r.listener == Some(listener))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every listener; their sockets died with the link.
    pub fn clear_listeners(&mut self) -> Vec<SocketId> {
        self.entries
            .iter_mut()
            .filter_map(|r| r.listener.take())
            .collect()
    }
}

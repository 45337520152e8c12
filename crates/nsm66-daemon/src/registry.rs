//! The ordered client record store.
//!
//! Insertion order is preserved and drives deterministic iteration
//! during save and switch fan-outs. Lookups exist by source address,
//! ID, name, (name, ID) pair, and PID; removal is by position so a
//! caller always removes exactly the record it resolved.

use std::net::SocketAddr;

use nsm66_core::id;

use crate::client::{Client, PendingCommand};

/// Ordered collection of client records.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<Client>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.iter_mut()
    }

    /// Append a record, returning its position.
    pub fn push(&mut self, client: Client) -> usize {
        self.clients.push(client);
        self.clients.len() - 1
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Client> {
        self.clients.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Client> {
        self.clients.get_mut(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Client {
        self.clients.remove(index)
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }

    /// Drop every record the predicate rejects.
    pub fn retain<F: FnMut(&Client) -> bool>(&mut self, keep: F) {
        self.clients.retain(keep);
    }

    /// Look up by ID; a non-ID-shaped argument falls back to a name
    /// lookup so GUI messages may use either form.
    #[must_use]
    pub fn position_by_id(&self, client_id: &str) -> Option<usize> {
        if id::is_client_id(client_id) {
            self.clients.iter().position(|c| c.client_id == client_id)
        } else {
            self.position_by_name(client_id)
        }
    }

    #[must_use]
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn position_by_name_and_id(&self, name: &str, client_id: &str) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.name == name && c.client_id == client_id)
    }

    /// Exact host+port match on the announce source address.
    #[must_use]
    pub fn position_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.clients.iter().position(|c| c.addr == Some(addr))
    }

    #[must_use]
    pub fn position_by_pid(&self, pid: u32) -> Option<usize> {
        self.clients.iter().position(|c| c.pid == Some(pid))
    }

    /// Generate a fresh `nWXYZ` ID unique among current records.
    #[must_use]
    pub fn generate_id(&self) -> String {
        id::generate_client_id(|candidate| {
            self.clients.iter().any(|c| c.client_id == candidate)
        })
    }

    /// Any active client whose last reply was an error.
    #[must_use]
    pub fn have_errors(&self) -> bool {
        self.clients.iter().any(|c| c.active && c.has_error())
    }

    /// Any active client still owes a reply.
    #[must_use]
    pub fn replies_pending(&self) -> bool {
        self.clients.iter().any(|c| c.active && c.reply_pending())
    }

    /// Clients that have either announced or failed to launch; used by
    /// the announce grace loop, which cannot wait on clients that will
    /// never start.
    #[must_use]
    pub fn responsive_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.active || c.launch_error)
            .count()
    }

    /// Any client we told to quit or kill that has not died yet.
    #[must_use]
    pub fn killed_clients_alive(&self) -> bool {
        self.clients.iter().any(|c| {
            matches!(c.pending(), PendingCommand::Quit | PendingCommand::Kill)
                && c.is_running()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn registry_with(names: &[(&str, &str)]) -> ClientRegistry {
        let mut reg = ClientRegistry::new();
        for (name, id) in names {
            reg.push(Client::new(*name, *name, *id));
        }
        reg
    }

    #[test]
    fn insertion_order_is_preserved() {
        let reg = registry_with(&[("a", "nAAAA"), ("b", "nBBBB"), ("c", "nCCCC")]);
        let names: Vec<_> = reg.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn lookup_by_id_falls_back_to_name() {
        let reg = registry_with(&[("seq66", "nWXYZ")]);
        assert_eq!(reg.position_by_id("nWXYZ"), Some(0));
        assert_eq!(reg.position_by_id("seq66"), Some(0));
        assert_eq!(reg.position_by_id("nQQQQ"), None);
    }

    #[test]
    fn name_and_id_pair_wins_over_name_only() {
        // Duplicated sessions carry equal names with distinct IDs; the
        // pair lookup must select the exact row.
        let reg = registry_with(&[("seq66", "nAAAA"), ("seq66", "nBBBB")]);
        assert_eq!(reg.position_by_name_and_id("seq66", "nBBBB"), Some(1));
        assert_eq!(reg.position_by_name("seq66"), Some(0));
    }

    #[test]
    fn lookup_by_address() {
        let mut reg = registry_with(&[("a", "nAAAA"), ("b", "nBBBB")]);
        reg.get_mut(1).unwrap().addr = Some(addr(9000));
        assert_eq!(reg.position_by_addr(addr(9000)), Some(1));
        assert_eq!(reg.position_by_addr(addr(9001)), None);
    }

    #[test]
    fn generated_ids_avoid_existing_records() {
        let reg = registry_with(&[("a", "nAAAA")]);
        for _ in 0..50 {
            let id = reg.generate_id();
            assert_ne!(id, "nAAAA");
        }
    }

    #[test]
    fn wait_loop_predicates() {
        let mut reg = registry_with(&[("a", "nAAAA"), ("b", "nBBBB")]);
        assert!(!reg.replies_pending());
        assert_eq!(reg.responsive_count(), 0);

        {
            let a = reg.get_mut(0).unwrap();
            a.active = true;
            a.set_pending(PendingCommand::Save);
        }
        assert!(reg.replies_pending());
        assert_eq!(reg.responsive_count(), 1);

        {
            let b = reg.get_mut(1).unwrap();
            b.launch_error = true;
        }
        assert_eq!(reg.responsive_count(), 2);

        reg.get_mut(0).unwrap().clear_pending();
        assert!(!reg.replies_pending());
    }

    #[test]
    fn killed_clients_tracked_until_reaped() {
        let mut reg = registry_with(&[("a", "nAAAA")]);
        {
            let a = reg.get_mut(0).unwrap();
            a.pid = Some(4242);
            a.set_pending(PendingCommand::Quit);
        }
        assert!(reg.killed_clients_alive());

        reg.get_mut(0).unwrap().pid = None;
        assert!(!reg.killed_clients_alive());
    }
}

//! Rotation over a pool of clients, one per API key.
//!
//! The pool tracks a current client and rotates when a caller decides the
//! current one is spent. [`ClientPool::next_client`] is a plain round-robin
//! step; [`ClientPool::next_useful_client`] additionally skips clients with
//! no remaining daily capacity. Selection by out-of-range index or unknown
//! key clears the current client rather than failing.

use tracing::info;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::settings::ClientSettings;

/// Pool of clients keyed by position and API key.
pub struct ClientPool {
    clients: Vec<Client>,
    current_index: Option<usize>,
}

impl ClientPool {
    /// Build a pool of production clients; the current client starts at the
    /// lowest index with daily capacity.
    pub fn new(settings: Vec<ClientSettings>) -> Self {
        Self::with_clients(settings.into_iter().map(Client::new).collect())
    }

    /// Pool over pre-built clients (custom transports, tests).
    pub fn with_clients(clients: Vec<Client>) -> Self {
        let mut pool = Self {
            clients,
            current_index: None,
        };
        pool.current_index = pool.lowest_useful_client_index();
        pool
    }

    /// Replace every client; rotation state starts over.
    pub fn reset_clients(&mut self, settings: Vec<ClientSettings>) {
        info!(clients = settings.len(), "resetting client pool");
        self.clients = settings.into_iter().map(Client::new).collect();
        self.current_index = self.lowest_useful_client_index();
    }

    /// Position of the client holding `api_key`.
    pub fn client_index(&self, api_key: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.api_key() == api_key)
    }

    /// Select a client by index or API key and make it current. At most one
    /// selector may be given; none means the current client. A missing
    /// index or key clears the current client and returns `None`.
    pub fn client(
        &mut self,
        index: Option<usize>,
        api_key: Option<&str>,
    ) -> Result<Option<&mut Client>> {
        match (index, api_key) {
            (Some(_), Some(_)) => Err(Error::InvalidArgument(
                "select a client by index or by api key, not both".to_string(),
            )),
            (Some(index), None) => {
                if index < self.clients.len() {
                    self.current_index = Some(index);
                } else {
                    self.current_index = None;
                }
                Ok(self.current())
            }
            (None, Some(api_key)) => {
                self.current_index = self.client_index(api_key);
                Ok(self.current())
            }
            (None, None) => Ok(self.current()),
        }
    }

    /// The current client, if one is selected.
    pub fn current(&mut self) -> Option<&mut Client> {
        match self.current_index {
            Some(index) => self.clients.get_mut(index),
            None => None,
        }
    }

    /// Rotate to the next client in order, wrapping around. Does not skip
    /// exhausted clients; with no current client it starts at the front.
    pub fn next_client(&mut self) -> Option<&mut Client> {
        if self.clients.is_empty() {
            self.current_index = None;
            return None;
        }
        let next = match self.current_index {
            Some(index) => (index + 1) % self.clients.len(),
            None => 0,
        };
        self.current_index = Some(next);
        self.current()
    }

    /// Rotate to the next client with daily capacity, wrapping around and
    /// skipping exhausted ones. Clears the current client when every client
    /// is spent.
    pub fn next_useful_client(&mut self) -> Option<&mut Client> {
        if self.clients.is_empty() {
            self.current_index = None;
            return None;
        }
        let len = self.clients.len();
        let start = self.current_index.map(|i| i + 1).unwrap_or(0);
        for step in 0..len {
            let candidate = (start + step) % len;
            if self.clients[candidate].has_daily_capacity() {
                self.current_index = Some(candidate);
                return self.current();
            }
        }
        self.current_index = None;
        None
    }

    /// True iff any client still has daily capacity.
    pub fn has_useful_model(&self) -> bool {
        self.clients.iter().any(Client::has_daily_capacity)
    }

    /// Lowest index with daily capacity.
    pub fn lowest_useful_client_index(&self) -> Option<usize> {
        self.clients.iter().position(Client::has_daily_capacity)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settings::ModelSettings;
    use crate::testing::{async_scripted, scripted, Script};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn test_client(api_key: &str, script: &Script) -> Client {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        ));
        let settings = ClientSettings::with_model_settings(
            api_key,
            ModelSettings::builder("gemini-2.0-flash")
                .requests_per_day(1)
                .requests_per_minute(10)
                .tokens_per_minute(1_000)
                .context_limit(10_000)
                .build()
                .unwrap(),
        );
        Client::with_transports(settings, scripted(script), async_scripted(script), clock)
    }

    fn pool_of(keys: &[&str], script: &Script) -> ClientPool {
        ClientPool::with_clients(keys.iter().map(|k| test_client(k, script)).collect())
    }

    #[test]
    fn test_pool_starts_at_lowest_useful_client() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b", "c"], &script);
        assert_eq!(pool.current_index(), Some(0));
        assert_eq!(pool.current().unwrap().api_key(), "a");
    }

    #[test]
    fn test_rotation_skips_exhausted_clients() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b", "c"], &script);

        pool.current().unwrap().exhaust_day();
        let next = pool.next_useful_client().unwrap();
        assert_eq!(next.api_key(), "b");

        next.exhaust_day();
        assert_eq!(pool.next_useful_client().unwrap().api_key(), "c");
    }

    #[test]
    fn test_rotation_wraps_around() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b"], &script);
        pool.client(Some(1), None).unwrap();
        assert_eq!(pool.next_useful_client().unwrap().api_key(), "a");
    }

    #[test]
    fn test_all_exhausted_clears_current_and_reports_no_useful_model() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b", "c"], &script);
        for client in pool.clients() {
            client.exhaust_day();
        }
        assert!(!pool.has_useful_model());
        assert!(pool.next_useful_client().is_none());
        assert_eq!(pool.current_index(), None);
        assert!(pool.current().is_none());
    }

    #[test]
    fn test_next_client_does_not_skip_exhausted() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b", "c"], &script);
        pool.clients()[1].exhaust_day();

        let next = pool.next_client().unwrap();
        assert_eq!(next.api_key(), "b");
        assert!(!next.has_daily_capacity());
    }

    #[test]
    fn test_select_by_api_key() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b", "c"], &script);
        let selected = pool.client(None, Some("b")).unwrap().unwrap();
        assert_eq!(selected.api_key(), "b");
        assert_eq!(pool.current_index(), Some(1));
    }

    #[test]
    fn test_unknown_key_or_index_clears_current() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a", "b"], &script);

        assert!(pool.client(None, Some("nope")).unwrap().is_none());
        assert_eq!(pool.current_index(), None);

        pool.client(Some(0), None).unwrap();
        assert!(pool.client(Some(9), None).unwrap().is_none());
        assert_eq!(pool.current_index(), None);
    }

    #[test]
    fn test_selecting_by_both_index_and_key_fails() {
        let script = Script::new(5);
        let mut pool = pool_of(&["a"], &script);
        assert!(matches!(
            pool.client(Some(0), Some("a")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_client_index_finds_key_position() {
        let script = Script::new(5);
        let pool = pool_of(&["a", "b", "c"], &script);
        assert_eq!(pool.client_index("c"), Some(2));
        assert_eq!(pool.client_index("zz"), None);
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = ClientPool::with_clients(Vec::new());
        assert!(pool.is_empty());
        assert!(!pool.has_useful_model());
        assert!(pool.next_client().is_none());
        assert!(pool.next_useful_client().is_none());
        assert!(pool.current().is_none());
    }

    #[test]
    fn test_lowest_useful_skips_exhausted_prefix() {
        let script = Script::new(5);
        let pool = {
            let mut pool = pool_of(&["a", "b", "c"], &script);
            pool.clients()[0].exhaust_day();
            pool.clients()[1].exhaust_day();
            pool
        };
        assert_eq!(pool.lowest_useful_client_index(), Some(2));
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::Channel;

/// Registry of live shared channels, keyed by instrument name. At most one
/// shared channel exists per instrument; dead channels are pruned on lookup.
#[derive(Clone)]
pub struct Inventory(Arc<Mutex<HashMap<String, Channel>>>);

impl Inventory {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn insert(&self, name: &str, channel: Channel) -> Option<Channel> {
        let mut inner = self.0.lock().unwrap();
        inner.insert(name.to_string(), channel)
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        let mut inner = self.0.lock().unwrap();
        match inner.get(name) {
            Some(channel) if channel.is_alive() => Some(channel.clone()),
            Some(_) => {
                log::debug!("pruning dead channel for {}", name);
                inner.remove(name);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, name: &str) -> Option<Channel> {
        let mut inner = self.0.lock().unwrap();
        inner.remove(name)
    }

    pub fn stop_all(&self) {
        log::debug!("stopping all channels");
        let mut inner = self.0.lock().unwrap();
        for (_, channel) in inner.drain() {
            channel.stop();
        }
    }

    pub fn list(&self) -> Vec<String> {
        let inner = self.0.lock().unwrap();
        inner.keys().cloned().collect()
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

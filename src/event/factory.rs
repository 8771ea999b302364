//! Event Factory
//!
//! Parses devd text notifications and maps the `system` tag to the event kind
//! that routes them. Systems with no registered kind are not of interest.
//!
//! Line shapes:
//!
//! ```text
//! !system=ZFS subsystem=ZFS type=misc.fs.zfs.config_sync pool_guid=42
//! +da0 at scbus0 target=1 lun=0 on mpr0
//! -da0 at scbus0 target=1 lun=0 on mpr0
//! ? at pnpinfo vendor=0x8086 on pci0
//! ```

use crate::error::{Error, Result};
use crate::event::record::{Event, EventKind, EventType};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

/// Maps `system=` values to event kinds and builds events from devd lines
#[derive(Debug, Clone)]
pub struct EventFactory {
    registry: HashMap<String, EventKind>,
}

impl Default for EventFactory {
    fn default() -> Self {
        let mut factory = Self {
            registry: HashMap::new(),
        };
        factory.register("DEVFS", EventKind::Devfs);
        factory.register("ZFS", EventKind::Zfs);
        factory
    }
}

impl EventFactory {
    /// Factory with no registered systems
    pub fn empty() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// Route events of `system` to `kind`
    pub fn register(&mut self, system: &str, kind: EventKind) {
        self.registry.insert(system.to_string(), kind);
    }

    /// Parse one devd line.
    ///
    /// Returns `Ok(None)` for well-formed events nobody routes.
    pub fn build(&self, line: &str) -> Result<Option<Event>> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut chars = line.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| Error::MalformedEvent("empty event".into()))?;
        let event_type = EventType::from_prefix(prefix)
            .ok_or_else(|| {
                Error::MalformedEvent(format!("unknown event type '{}': {}", prefix, line))
            })?;

        let nvpairs = parse_body(event_type, chars.as_str())?;

        let Some(system) = nvpairs.get("system") else {
            debug!(event = %line, "Ignoring event without a system");
            return Ok(None);
        };
        match self.registry.get(system) {
            Some(kind) => Ok(Some(Event::new(*kind, event_type, nvpairs, line))),
            None => {
                debug!(system = %system, "Ignoring event for unregistered system");
                Ok(None)
            }
        }
    }
}

/// Split the body into tokens, honouring double-quoted values
fn tokenize(body: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in body.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(Error::MalformedEvent(format!("unterminated quote: {}", body)));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_body(event_type: EventType, body: &str) -> Result<IndexMap<String, String>> {
    let mut nvpairs = IndexMap::new();
    let mut tokens = tokenize(body)?.into_iter().peekable();

    // Attach/detach lines lead with the device name
    if matches!(event_type, EventType::Attach | EventType::Detach) {
        if let Some(name) = tokens.next() {
            nvpairs.insert("device-name".to_string(), name);
        }
    }

    while let Some(token) = tokens.next() {
        if token == "at" && event_type != EventType::Notify {
            if let Some(location) = tokens.next_if(|t| !t.contains('=')) {
                nvpairs.insert("location".to_string(), location);
            }
            continue;
        }
        if token == "on" && event_type != EventType::Notify {
            if let Some(parent) = tokens.next() {
                nvpairs.insert("parent".to_string(), parent);
            }
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                nvpairs.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(Error::MalformedEvent(format!(
                    "expected key=value, found '{}'",
                    token
                )))
            }
        }
    }
    Ok(nvpairs)
}

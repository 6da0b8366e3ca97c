use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{Result, RomTextError};

/// A message slot: `part` selects the address table, `index` the slot in it.
///
/// Displays and serializes as `"pp:ii"` in lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId {
    pub part: u8,
    pub index: u16,
}

impl MessageId {
    pub const fn new(part: u8, index: u16) -> Self {
        Self { part, index }
    }

    /// Entity data uses `00:00` to mean "no message".
    pub fn is_null(&self) -> bool {
        self.part == 0 && self.index == 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.part, self.index)
    }
}

impl FromStr for MessageId {
    type Err = RomTextError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || RomTextError::Config(format!("'{}' is not a message id (expected pp:ii)", s));
        let (part, index) = s.trim().split_once(':').ok_or_else(bad)?;
        Ok(Self {
            part: u8::from_str_radix(part, 16).map_err(|_| bad())?,
            index: u16::from_str_radix(index, 16).map_err(|_| bad())?,
        })
    }
}

impl TryFrom<String> for MessageId {
    type Error = RomTextError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

/// Slots read by game logic rather than by any entity table.
pub const HARDCODED_MESSAGES: &[MessageId] = &[
    MessageId::new(0x20, 0x1d),
    MessageId::new(0x1b, 0x0f),
    MessageId::new(0x1b, 0x10),
    MessageId::new(0x1b, 0x11),
    MessageId::new(0x1b, 0x12),
    MessageId::new(0x1b, 0x05),
    MessageId::new(0x1f, 0x00),
    MessageId::new(0x13, 0x00),
    MessageId::new(0x0b, 0x01),
    MessageId::new(0x20, 0x0c),
    MessageId::new(0x20, 0x0f),
    MessageId::new(0x1c, 0x11),
    MessageId::new(0x0e, 0x05),
    MessageId::new(0x16, 0x00),
    MessageId::new(0x20, 0x11),
    MessageId::new(0x21, 0x00),
    MessageId::new(0x21, 0x02),
    MessageId::new(0x21, 0x01),
    MessageId::new(0x06, 0x00),
    MessageId::new(0x18, 0x00),
    MessageId::new(0x18, 0x02),
    MessageId::new(0x18, 0x04),
    MessageId::new(0x18, 0x08),
    MessageId::new(0x1b, 0x03),
    MessageId::new(0x1b, 0x00),
    MessageId::new(0x06, 0x01),
    MessageId::new(0x10, 0x13),
    MessageId::new(0x19, 0x05),
    MessageId::new(0x20, 0x14),
    MessageId::new(0x20, 0x15),
    MessageId::new(0x20, 0x17),
    MessageId::new(0x20, 0x02),
    MessageId::new(0x20, 0x0d),
    MessageId::new(0x20, 0x19),
    MessageId::new(0x20, 0x1a),
    MessageId::new(0x20, 0x1b),
    MessageId::new(0x03, 0x01),
    MessageId::new(0x03, 0x02),
    MessageId::new(0x10, 0x10),
    MessageId::new(0x10, 0x11),
    MessageId::new(0x10, 0x12),
    MessageId::new(0x0c, 0x04),
    MessageId::new(0x0c, 0x05),
    MessageId::new(0x03, 0x03),
    MessageId::new(0x20, 0x0e),
    MessageId::new(0x20, 0x13),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRef {
    pub id: u16,
    pub message: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: u16,
    #[serde(default)]
    pub use_messages: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDialogs {
    /// Absent for dialog that applies wherever the NPC is spawned.
    #[serde(default)]
    pub location: Option<u16>,
    pub messages: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcRef {
    pub id: u16,
    #[serde(default)]
    pub global_dialogs: Vec<MessageId>,
    #[serde(default)]
    pub local_dialogs: Vec<LocalDialogs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SageRef {
    pub sage: String,
    #[serde(default)]
    pub default_messages: Vec<MessageId>,
    #[serde(default)]
    pub message_groups: Vec<Vec<MessageId>>,
}

/// Every message reference the rest of the ROM makes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityRefs {
    pub triggers: Vec<TriggerRef>,
    pub items: Vec<ItemRef>,
    pub npcs: Vec<NpcRef>,
    pub sages: Vec<SageRef>,
    /// Added to [`HARDCODED_MESSAGES`].
    pub hardcoded: Vec<MessageId>,
}

impl EntityRefs {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Live message ids and the places that reference them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    sites: BTreeMap<MessageId, BTreeSet<String>>,
}

impl Usage {
    /// Marks every id in `ids` as live without a known referrer.
    pub fn all(ids: impl IntoIterator<Item = MessageId>) -> Self {
        let mut usage = Self::default();
        for id in ids {
            usage.record(id, "Unreferenced");
        }
        usage
    }

    pub fn record(&mut self, id: MessageId, label: impl Into<String>) {
        self.sites.entry(id).or_default().insert(label.into());
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.sites.contains_key(id)
    }

    pub fn labels(&self, id: &MessageId) -> Option<&BTreeSet<String>> {
        self.sites.get(id)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Walks triggers, items, NPCs and sages in that order, then the hardcoded
/// ids.
pub fn collect(refs: &EntityRefs) -> Usage {
    let mut usage = Usage::default();

    for trigger in &refs.triggers {
        if !trigger.message.is_null() {
            usage.record(trigger.message, format!("Trigger ${:02x}", trigger.id));
        }
    }

    for item in &refs.items {
        for &m in item.use_messages.iter().filter(|m| !m.is_null()) {
            usage.record(m, format!("Item ${:02x}", item.id));
        }
    }

    for npc in &refs.npcs {
        let label = format!("NPC ${:02x}", npc.id);
        for &m in &npc.global_dialogs {
            usage.record(m, label.clone());
        }
        for local in &npc.local_dialogs {
            let label = match local.location {
                Some(loc) => format!("{} @ ${:02x}", label, loc),
                None => label.clone(),
            };
            for &m in &local.messages {
                usage.record(m, label.clone());
            }
        }
    }

    for sage in &refs.sages {
        let label = format!("Telepathy {}", sage.sage);
        for &m in sage.default_messages.iter().chain(sage.message_groups.iter().flatten()) {
            usage.record(m, label.clone());
        }
    }

    for &m in HARDCODED_MESSAGES.iter().chain(&refs.hardcoded) {
        usage.record(m, "Hardcoded");
    }

    usage
}

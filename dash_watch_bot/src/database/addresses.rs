use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;

use super::types::{AddResult, MAX_ADDRESSES_PER_CHAT};
use crate::types::DashAddress;

/// Which chat watches which addresses. Serialized as `users.json`:
/// chat ID to a list of addresses, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<i64, Vec<DashAddress>>", into = "BTreeMap<i64, Vec<DashAddress>>")]
pub struct AddressStore {
    chats: BTreeMap<i64, Vec<DashAddress>>,
}

impl AddressStore {
    pub fn add(&mut self, chat: ChatId, address: DashAddress) -> AddResult {
        let list = self.chats.entry(chat.0).or_default();
        if list.contains(&address) {
            AddResult::AlreadyPresent
        } else if list.len() >= MAX_ADDRESSES_PER_CHAT {
            AddResult::LimitExceeded
        } else {
            list.push(address);
            AddResult::Added
        }
    }

    /// Removes the address and returns where in the list it was.
    pub fn remove(&mut self, chat: ChatId, address: &DashAddress) -> Option<usize> {
        let list = self.chats.get_mut(&chat.0)?;
        let index = list.iter().position(|x| x == address)?;
        list.remove(index);
        if list.is_empty() {
            self.chats.remove(&chat.0);
        }
        Some(index)
    }

    /// Undo for [`Self::remove`].
    pub(super) fn insert_at(&mut self, chat: ChatId, index: usize, address: DashAddress) {
        let list = self.chats.entry(chat.0).or_default();
        list.insert(index.min(list.len()), address);
    }

    pub fn list(&self, chat: ChatId) -> &[DashAddress] {
        self.chats.get(&chat.0).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, chat: ChatId, address: &DashAddress) -> bool {
        self.list(chat).contains(address)
    }

    /// Every (chat, address) pair being watched right now.
    pub fn pairs(&self) -> Vec<(ChatId, DashAddress)> {
        self.chats
            .iter()
            .flat_map(|(chat, list)| list.iter().map(|address| (ChatId(*chat), address.clone())))
            .collect()
    }
}

impl TryFrom<BTreeMap<i64, Vec<DashAddress>>> for AddressStore {
    type Error = String;

    fn try_from(chats: BTreeMap<i64, Vec<DashAddress>>) -> Result<Self, Self::Error> {
        for (chat, list) in &chats {
            for (i, address) in list.iter().enumerate() {
                if list[..i].contains(address) {
                    return Err(format!("chat {chat} has address {address} listed twice"));
                }
            }
            if list.len() > MAX_ADDRESSES_PER_CHAT {
                // Older versions had no limit. Leave them be, they just can't add more.
                log::warn!(
                    "Chat {} watches {} addresses, over the limit of {}",
                    chat,
                    list.len(),
                    MAX_ADDRESSES_PER_CHAT
                );
            }
        }
        let mut chats = chats;
        chats.retain(|_, list| !list.is_empty());
        Ok(Self { chats })
    }
}

impl From<AddressStore> for BTreeMap<i64, Vec<DashAddress>> {
    fn from(value: AddressStore) -> Self {
        value.chats
    }
}

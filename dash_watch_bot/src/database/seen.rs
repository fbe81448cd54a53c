use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use teloxide::types::ChatId;

use super::{
    addresses::AddressStore,
    types::{SeenEntry, SEEN_HISTORY_LIMIT},
};
use crate::types::DashAddress;

type SeenMap = BTreeMap<i64, BTreeMap<DashAddress, Vec<SeenEntry>>>;

/// Transactions already announced, per chat and address. Serialized as
/// `sent_txs.json`: chat ID to address to a list of `{txid, seq}`, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SeenDocument")]
pub struct SeenStore {
    chats: SeenMap,
}

impl SeenStore {
    pub fn is_seen(&self, chat: ChatId, address: &DashAddress, txid: &str) -> bool {
        self.history(chat, address).iter().any(|x| x.txid == txid)
    }

    /// Remember this transaction and return its display number.
    ///
    /// Numbers continue from the highest one remembered for this address. If
    /// this transaction is already remembered, its existing number is returned.
    pub fn mark_seen(&mut self, chat: ChatId, address: &DashAddress, txid: &str) -> u64 {
        let history = self
            .chats
            .entry(chat.0)
            .or_default()
            .entry(address.clone())
            .or_default();

        if let Some(existing) = history.iter().find(|x| x.txid == txid) {
            return existing.seq;
        }

        let seq = history.iter().map(|x| x.seq).max().unwrap_or(0) + 1;
        history.push(SeenEntry {
            txid: txid.to_owned(),
            seq,
        });

        if history.len() > SEEN_HISTORY_LIMIT {
            let excess = history.len() - SEEN_HISTORY_LIMIT;
            history.drain(..excess);
        }

        seq
    }

    /// Forget everything about this address. Returns `true` if there was anything.
    pub fn clear(&mut self, chat: ChatId, address: &DashAddress) -> bool {
        let Some(addresses) = self.chats.get_mut(&chat.0) else {
            return false;
        };
        let removed = addresses.remove(address).is_some();
        if addresses.is_empty() {
            self.chats.remove(&chat.0);
        }
        removed
    }

    pub fn history(&self, chat: ChatId, address: &DashAddress) -> &[SeenEntry] {
        self.chats
            .get(&chat.0)
            .and_then(|x| x.get(address))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Drop entries of addresses that aren't watched anymore, which happens if
    /// we died between saving the two files. Returns how many addresses were dropped.
    pub fn prune_orphans(&mut self, watched: &AddressStore) -> usize {
        let mut pruned = 0;
        for (chat, addresses) in &mut self.chats {
            addresses.retain(|address, _| {
                let keep = watched.contains(ChatId(*chat), address);
                if !keep {
                    pruned += 1;
                }
                keep
            });
        }
        self.chats.retain(|_, addresses| !addresses.is_empty());
        pruned
    }
}

impl Serialize for SeenStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.chats.serialize(serializer)
    }
}

/// What an entry in `sent_txs.json` may look like. The Python version of this
/// bot wrote bare txids, or objects without a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeenRecord {
    Numbered { txid: String, seq: u64 },
    Unnumbered { txid: String },
    Bare(String),
}

type SeenDocument = BTreeMap<i64, BTreeMap<DashAddress, Vec<SeenRecord>>>;

impl TryFrom<SeenDocument> for SeenStore {
    type Error = String;

    fn try_from(document: SeenDocument) -> Result<Self, Self::Error> {
        let mut chats = SeenMap::new();

        for (chat, addresses) in document {
            for (address, records) in addresses {
                let mut history: Vec<SeenEntry> = Vec::with_capacity(records.len());
                for record in records {
                    let previous = history.last().map(|x| x.seq).unwrap_or(0);
                    let entry = match record {
                        SeenRecord::Numbered { txid, seq } => SeenEntry { txid, seq },
                        SeenRecord::Unnumbered { txid } | SeenRecord::Bare(txid) => SeenEntry {
                            txid,
                            seq: previous + 1,
                        },
                    };

                    if entry.seq <= previous {
                        return Err(format!(
                            "chat {chat} address {address}: number {} of {} does not increase",
                            entry.seq, entry.txid
                        ));
                    }
                    if history.iter().any(|x| x.txid == entry.txid) {
                        return Err(format!(
                            "chat {chat} address {address}: {} listed twice",
                            entry.txid
                        ));
                    }
                    history.push(entry);
                }

                if history.len() > SEEN_HISTORY_LIMIT {
                    let excess = history.len() - SEEN_HISTORY_LIMIT;
                    history.drain(..excess);
                }
                if !history.is_empty() {
                    chats.entry(chat).or_default().insert(address, history);
                }
            }
        }

        Ok(Self { chats })
    }
}

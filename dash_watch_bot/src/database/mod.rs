mod addresses;
mod persist;
mod seen;
mod types;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use teloxide::types::ChatId;
use tokio::sync::{Mutex, MutexGuard};

pub use addresses::AddressStore;
pub use seen::SeenStore;
pub use types::*;

use crate::types::DashAddress;

const USERS_FILE: &str = "users.json";
const SEEN_FILE: &str = "sent_txs.json";

/// Both stores. Only ever touched while holding [`Database`]'s lock.
#[derive(Debug, Default)]
pub struct Stores {
    pub addresses: AddressStore,
    pub seen: SeenStore,
    /// The last write of `seen` failed, so disk is behind memory.
    seen_unsaved: bool,
}

/// Who watches what, and what they were already told about.
///
/// Everything lives in memory behind one lock shared by the poll loop and the
/// command handlers, and is written out to two JSON files on every change.
pub struct Database {
    users_path: PathBuf,
    seen_path: PathBuf,
    stores: Mutex<Stores>,
}

impl Database {
    /// Load the state files from this directory, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if the files exist but can't be read or don't look right.
    pub fn open(dir: &Path) -> Result<Arc<Database>, Error> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_owned(),
            source,
        })?;

        let users_path = dir.join(USERS_FILE);
        let seen_path = dir.join(SEEN_FILE);

        let addresses: AddressStore = persist::load(&users_path)?;
        let mut seen: SeenStore = persist::load(&seen_path)?;

        let pruned = seen.prune_orphans(&addresses);
        if pruned > 0 {
            log::warn!("Dropped seen transactions of {pruned} addresses that aren't watched anymore.");
            persist::save(&seen_path, &seen)?;
        }

        log::info!("Loaded {} watched addresses.", addresses.pairs().len());

        Ok(Arc::new(Database {
            users_path,
            seen_path,
            stores: Mutex::new(Stores {
                addresses,
                seen,
                seen_unsaved: false,
            }),
        }))
    }

    /// Lock both stores. Don't hold this over network requests.
    pub async fn lock(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().await
    }

    /// Write the seen transactions to disk.
    /// If this fails, [`Self::save_pending_seen`] tries again later.
    pub async fn save_seen(&self, stores: &mut Stores) -> Result<(), Error> {
        let result = persist::save_in_background(&self.seen_path, &stores.seen).await;
        stores.seen_unsaved = result.is_err();
        result
    }

    /// Write the seen transactions again if the last write failed.
    pub async fn save_pending_seen(&self) -> Result<(), Error> {
        let mut stores = self.lock().await;
        if !stores.seen_unsaved {
            return Ok(());
        }
        log::info!("Retrying the failed save of seen transactions.");
        self.save_seen(&mut stores).await
    }

    async fn save_addresses(&self, stores: &Stores) -> Result<(), Error> {
        persist::save_in_background(&self.users_path, &stores.addresses).await
    }

    /// Start watching an address for this chat. The change is on disk before this returns.
    pub async fn add_address(&self, chat: ChatId, address: &str) -> Result<AddResult, Error> {
        let Ok(address) = DashAddress::parse(address) else {
            return Ok(AddResult::Invalid);
        };

        let mut stores = self.lock().await;
        let result = stores.addresses.add(chat, address.clone());
        if result != AddResult::Added {
            return Ok(result);
        }

        if let Err(e) = self.save_addresses(&stores).await {
            stores.addresses.remove(chat, &address);
            return Err(e);
        }

        // Should be empty already, but a fresh address gets a fresh count either way.
        if stores.seen.clear(chat, &address) {
            if let Err(e) = self.save_seen(&mut stores).await {
                log::warn!("Failed to save cleared seen transactions of {address}: {e}");
            }
        }

        Ok(AddResult::Added)
    }

    /// Stop watching an address for this chat and forget its seen transactions.
    pub async fn remove_address(&self, chat: ChatId, address: &str) -> Result<RemoveResult, Error> {
        let Ok(address) = DashAddress::parse(address) else {
            return Ok(RemoveResult::NotFound);
        };

        let mut stores = self.lock().await;
        let Some(index) = stores.addresses.remove(chat, &address) else {
            return Ok(RemoveResult::NotFound);
        };

        if let Err(e) = self.save_addresses(&stores).await {
            stores.addresses.insert_at(chat, index, address);
            return Err(e);
        }

        if stores.seen.clear(chat, &address) {
            // The address is gone from disk already. If this fails, the leftovers
            // get pruned on next load.
            if let Err(e) = self.save_seen(&mut stores).await {
                log::error!("Failed to save seen transactions after removing {address}: {e}");
            }
        }

        Ok(RemoveResult::Removed)
    }

    pub async fn list_addresses(&self, chat: ChatId) -> Vec<DashAddress> {
        self.lock().await.addresses.list(chat).to_vec()
    }

    /// Snapshot of every (chat, address) pair being watched.
    pub async fn watched_pairs(&self) -> Vec<(ChatId, DashAddress)> {
        self.lock().await.addresses.pairs()
    }

    pub async fn is_seen(&self, chat: ChatId, address: &DashAddress, txid: &str) -> bool {
        self.lock().await.seen.is_seen(chat, address, txid)
    }

    /// Remember a transaction and save right away. For batches, [`Self::lock`]
    /// and [`Self::save_seen`] once instead.
    pub async fn mark_seen(
        &self,
        chat: ChatId,
        address: &DashAddress,
        txid: &str,
    ) -> Result<u64, Error> {
        let mut stores = self.lock().await;
        let seq = stores.seen.mark_seen(chat, address, txid);
        self.save_seen(&mut stores).await?;
        Ok(seq)
    }
}

use std::{
    fmt::Display,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use arch_bot_commons::useful_methods::BotArchSendMsg;
use teloxide::{
    types::{ChatId, MessageId},
    Bot, RequestError,
};
use tokio::time::sleep;

use crate::{
    database::{self, Database},
    gateway::ChainGateway,
    notifier::{format_alert, Alert},
    types::{duffs_to_dash, DashAddress, Transaction},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Pause after a cycle went fine.
    pub interval: Duration,
    /// Pause after a cycle failed.
    pub backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_POLL_BACKOFF,
        }
    }
}

/// Something alerts can be sent through.
pub trait AlertSink: Send + Sync {
    type Error: Display + Send;

    fn deliver(&self, chat: ChatId, text: &str)
        -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl AlertSink for Bot {
    type Error = RequestError;

    async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), RequestError> {
        self.archsendmsg_no_link_preview(chat, text, None::<MessageId>)
            .await
            .map(|_| ())
    }
}

/// Last known DASH price. A failed refresh keeps the old one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateCache {
    rate: Option<f64>,
}

impl RateCache {
    pub async fn refresh(&mut self, gateway: &impl ChainGateway) -> Option<f64> {
        match gateway.fetch_exchange_rate().await {
            Some(rate) => self.rate = Some(rate),
            None if self.rate.is_some() => log::debug!("Keeping the old DASH price."),
            None => (),
        }
        self.rate
    }

    pub fn get(&self) -> Option<f64> {
        self.rate
    }
}

/// What one poll cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub addresses_polled: usize,
    pub new_transactions: usize,
    pub alerts_sent: usize,
    pub delivery_failures: usize,
}

/// Poll every watched address once and tell chats about new incoming transactions.
///
/// Transactions are marked as seen and saved *before* the alerts go out, and a
/// failed alert is not tried again.
///
/// # Errors
///
/// Fails if seen transactions couldn't be saved. Alerts of the address that hit
/// the error are still sent; the rest of the cycle is skipped, and the save is
/// tried again at the start of the next cycle.
pub async fn run_cycle<G: ChainGateway, S: AlertSink>(
    database: &Database,
    gateway: &G,
    sink: &S,
    rate: &mut RateCache,
) -> Result<CycleReport, database::Error> {
    database.save_pending_seen().await?;

    let rate = rate.refresh(gateway).await;
    let mut report = CycleReport::default();

    let pairs = database.watched_pairs().await;
    log::debug!("Polling {} watched addresses", pairs.len());

    for (chat, address) in pairs {
        report.addresses_polled += 1;

        let transactions = gateway.fetch_recent_transactions(&address).await;
        if transactions.is_empty() {
            // Either nothing there, or the explorer is having a moment. Can't tell.
            continue;
        }

        let recorded = record_new_transactions(database, chat, &address, &transactions, rate).await;
        report.new_transactions += recorded.new_transactions;

        for text in &recorded.alerts {
            match sink.deliver(chat, text).await {
                Ok(()) => report.alerts_sent += 1,
                Err(e) => {
                    report.delivery_failures += 1;
                    log::warn!("Failed to alert chat {chat} about {address}: {e}");
                }
            }
        }

        recorded.saved?;
    }

    Ok(report)
}

struct Recorded {
    new_transactions: usize,
    alerts: Vec<String>,
    saved: Result<(), database::Error>,
}

/// Diff these transactions against the seen ones, mark the new ones, save,
/// and render alerts for those that paid to the address.
async fn record_new_transactions(
    database: &Database,
    chat: ChatId,
    address: &DashAddress,
    transactions: &[Transaction],
    rate: Option<f64>,
) -> Recorded {
    let mut stores = database.lock().await;
    let mut recorded = Recorded {
        new_transactions: 0,
        alerts: Vec::new(),
        saved: Ok(()),
    };

    // Could have been removed while we were out fetching.
    if !stores.addresses.contains(chat, address) {
        return recorded;
    }

    // Oldest first, so numbers go up in the order things happened.
    for tx in transactions.iter().rev() {
        if stores.seen.is_seen(chat, address, &tx.txid) {
            continue;
        }
        recorded.new_transactions += 1;

        let amount = tx.received_by(address);
        let seq = stores.seen.mark_seen(chat, address, &tx.txid);

        if amount == 0 {
            log::debug!("{} doesn't pay to {address}, not alerting.", tx.txid);
            continue;
        }

        log::info!("New transaction {} #{seq} for {address} of chat {chat}", tx.txid);
        recorded.alerts.push(format_alert(&Alert {
            address,
            amount,
            fiat: rate.map(|rate| duffs_to_dash(amount) * rate),
            txid: &tx.txid,
            timestamp: tx.timestamp,
            confirmations: tx.confirmations,
            seq,
        }));
    }

    if recorded.new_transactions > 0 {
        recorded.saved = database.save_seen(&mut stores).await;
    }

    recorded
}

/// Run poll cycles until the database is dropped.
pub async fn poll_spinloop<G: ChainGateway, S: AlertSink>(
    database: Weak<Database>,
    gateway: Arc<G>,
    sink: S,
    timing: PollTiming,
) {
    let mut rate = RateCache::default();
    loop {
        let Some(db) = database.upgrade() else {
            log::info!("Database is gone, stopping the poll loop.");
            return;
        };

        let pause = match run_cycle(&db, gateway.as_ref(), &sink, &mut rate).await {
            Ok(report) => {
                log::debug!("Poll cycle done: {report:?}");
                timing.interval
            }
            Err(e) => {
                log::error!("Poll cycle failed, backing off: {e}");
                timing.backoff
            }
        };

        // Don't keep the database alive while sleeping.
        drop(db);
        sleep(pause).await;
    }
}

/// Keep [`poll_spinloop`] running, starting it over if it panics.
pub async fn supervise_poll_loop<G, S>(
    database: Weak<Database>,
    gateway: Arc<G>,
    sink: S,
    timing: PollTiming,
) where
    G: ChainGateway + 'static,
    S: AlertSink + Clone + 'static,
{
    loop {
        let handle = tokio::spawn(poll_spinloop(
            database.clone(),
            gateway.clone(),
            sink.clone(),
            timing,
        ));

        match handle.await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                log::error!("Poll loop panicked, restarting it: {e}");
                sleep(timing.backoff).await;
            }
            Err(e) => {
                log::warn!("Poll loop got cancelled: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use super::*;
    use crate::types::TxOutput;

    const CHAT: ChatId = ChatId(77);

    fn address(n: usize) -> DashAddress {
        DashAddress::parse(&format!("X{:0>33}", n)).unwrap()
    }

    fn paying(txid: &str, to: &DashAddress, value: u64) -> Transaction {
        Transaction {
            txid: txid.to_owned(),
            outputs: vec![TxOutput {
                addresses: vec![to.to_string()],
                value,
            }],
            timestamp: None,
            confirmations: Some(1),
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        transactions: Mutex<HashMap<DashAddress, Vec<Transaction>>>,
        rate: Mutex<Option<f64>>,
        down: Mutex<bool>,
    }

    impl FakeGateway {
        fn serve(&self, address: &DashAddress, newest_first: Vec<Transaction>) {
            self.transactions
                .lock()
                .unwrap()
                .insert(address.clone(), newest_first);
        }
        fn set_down(&self, down: bool) {
            *self.down.lock().unwrap() = down;
        }
    }

    impl ChainGateway for FakeGateway {
        async fn fetch_recent_transactions(&self, address: &DashAddress) -> Vec<Transaction> {
            if *self.down.lock().unwrap() {
                return Vec::new();
            }
            self.transactions
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_default()
        }
        async fn fetch_exchange_rate(&self) -> Option<f64> {
            if *self.down.lock().unwrap() {
                return None;
            }
            *self.rate.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<(ChatId, String)>>,
        blocked: Mutex<HashSet<ChatId>>,
    }

    impl FakeSink {
        fn take(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .drain(..)
                .map(|(_, text)| text)
                .collect()
        }
    }

    impl AlertSink for FakeSink {
        type Error = String;
        async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), String> {
            if self.blocked.lock().unwrap().contains(&chat) {
                return Err("Forbidden: bot was blocked by the user".to_owned());
            }
            self.sent.lock().unwrap().push((chat, text.to_owned()));
            Ok(())
        }
    }

    struct Setup {
        _dir: tempfile::TempDir,
        db: Arc<Database>,
        gateway: FakeGateway,
        sink: FakeSink,
        rate: RateCache,
    }

    impl Setup {
        async fn new(addresses: &[DashAddress]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::open(dir.path()).unwrap();
            for address in addresses {
                db.add_address(CHAT, address.as_str()).await.unwrap();
            }
            Setup {
                _dir: dir,
                db,
                gateway: FakeGateway::default(),
                sink: FakeSink::default(),
                rate: RateCache::default(),
            }
        }

        async fn cycle(&mut self) -> CycleReport {
            run_cycle(&self.db, &self.gateway, &self.sink, &mut self.rate)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn alerts_go_out_oldest_first() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(
            &addr,
            vec![
                paying("t3", &addr, 3),
                paying("t2", &addr, 2),
                paying("t1", &addr, 1),
            ],
        );

        let report = s.cycle().await;
        assert_eq!(report.alerts_sent, 3);

        let sent = s.sink.take();
        assert_eq!(sent.len(), 3);
        for (i, text) in sent.iter().enumerate() {
            let n = i + 1;
            assert!(text.contains(&format!("transaction #{n}</b>")), "{text}");
            assert!(text.contains(&format!("<code>t{n}</code>")), "{text}");
        }
    }

    #[tokio::test]
    async fn same_response_twice_is_quiet() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t2", &addr, 2), paying("t1", &addr, 1)]);

        assert_eq!(s.cycle().await.alerts_sent, 2);
        let report = s.cycle().await;
        assert_eq!(report.new_transactions, 0);
        assert_eq!(report.alerts_sent, 0);

        // Something new shows up on top, only that one gets announced.
        s.gateway.serve(
            &addr,
            vec![
                paying("t3", &addr, 3),
                paying("t2", &addr, 2),
                paying("t1", &addr, 1),
            ],
        );
        s.sink.take();
        assert_eq!(s.cycle().await.alerts_sent, 1);
        let sent = s.sink.take();
        assert!(sent[0].contains("transaction #3</b>"));
    }

    #[tokio::test]
    async fn unrelated_transactions_are_not_announced() {
        let addr = address(1);
        let other = address(2);
        let mut s = Setup::new(&[addr.clone()]).await;
        // Spent from the address, change went elsewhere.
        s.gateway.serve(&addr, vec![paying("spent", &other, 1000)]);

        let report = s.cycle().await;
        assert_eq!(report.new_transactions, 1);
        assert_eq!(report.alerts_sent, 0);
        assert!(s.sink.take().is_empty());
        // It's remembered though, so it's not looked at again.
        assert!(s.db.is_seen(CHAT, &addr, "spent").await);
    }

    #[tokio::test]
    async fn explorer_outage_changes_nothing() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t1", &addr, 1)]);
        s.gateway.set_down(true);

        let report = s.cycle().await;
        assert_eq!(report.addresses_polled, 1);
        assert_eq!(report.new_transactions, 0);
        assert!(s.sink.take().is_empty());
        assert!(s.db.lock().await.seen.history(CHAT, &addr).is_empty());

        // A transaction arrives while it's down, and is caught once it's back.
        s.gateway.serve(&addr, vec![paying("t2", &addr, 2), paying("t1", &addr, 1)]);
        s.cycle().await;
        s.gateway.set_down(false);
        assert_eq!(s.cycle().await.alerts_sent, 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_not_retried() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t1", &addr, 1)]);
        s.sink.blocked.lock().unwrap().insert(CHAT);

        let report = s.cycle().await;
        assert_eq!(report.delivery_failures, 1);
        assert!(s.db.is_seen(CHAT, &addr, "t1").await);

        s.sink.blocked.lock().unwrap().clear();
        assert_eq!(s.cycle().await.alerts_sent, 0);
        assert!(s.sink.take().is_empty());
    }

    #[tokio::test]
    async fn readding_an_address_starts_over() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t2", &addr, 2), paying("t1", &addr, 1)]);
        s.cycle().await;
        s.sink.take();

        s.db.remove_address(CHAT, addr.as_str()).await.unwrap();
        s.db.add_address(CHAT, addr.as_str()).await.unwrap();
        s.gateway.serve(&addr, vec![paying("t1", &addr, 1)]);

        assert_eq!(s.cycle().await.alerts_sent, 1);
        let sent = s.sink.take();
        assert!(sent[0].contains("transaction #1</b>"));
        assert!(sent[0].contains("<code>t1</code>"));
    }

    #[tokio::test]
    async fn price_is_cached_through_failures() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;

        // No price ever: no fiat, but the alert still goes out.
        s.gateway.serve(&addr, vec![paying("t1", &addr, 100_000_000)]);
        s.cycle().await;
        assert!(!s.sink.take()[0].contains("~$"));

        *s.gateway.rate.lock().unwrap() = Some(20.0);
        s.gateway.serve(&addr, vec![paying("t2", &addr, 50_000_000)]);
        s.cycle().await;
        assert!(s.sink.take()[0].contains("(~$10.00)"));

        // Price feed breaks. The last known price is still used.
        *s.gateway.rate.lock().unwrap() = None;
        s.gateway.serve(&addr, vec![paying("t3", &addr, 300_000_000)]);
        s.cycle().await;
        assert!(s.sink.take()[0].contains("(~$60.00)"));
        assert_eq!(s.rate.get(), Some(20.0));
    }

    #[tokio::test]
    async fn seen_state_is_saved() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t2", &addr, 2), paying("t1", &addr, 1)]);
        s.cycle().await;

        let reopened = Database::open(s._dir.path()).unwrap();
        assert!(reopened.is_seen(CHAT, &addr, "t1").await);
        assert!(reopened.is_seen(CHAT, &addr, "t2").await);
        assert_eq!(reopened.mark_seen(CHAT, &addr, "t3").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_save_still_alerts_and_is_retried() {
        let addr = address(1);
        let mut s = Setup::new(&[addr.clone()]).await;
        s.gateway.serve(&addr, vec![paying("t1", &addr, 1)]);

        // Renaming over a directory fails.
        let seen_path = s._dir.path().join("sent_txs.json");
        let _ = std::fs::remove_file(&seen_path);
        std::fs::create_dir(&seen_path).unwrap();

        let result = run_cycle(&s.db, &s.gateway, &s.sink, &mut s.rate).await;
        assert!(result.is_err());
        assert_eq!(s.sink.take().len(), 1);

        // Still broken: the cycle fails before polling anything.
        let result = run_cycle(&s.db, &s.gateway, &s.sink, &mut s.rate).await;
        assert!(result.is_err());
        assert!(s.sink.take().is_empty());

        std::fs::remove_dir(&seen_path).unwrap();
        let report = s.cycle().await;
        assert_eq!(report.new_transactions, 0);
        assert!(s.sink.take().is_empty());
        assert!(seen_path.is_file());

        let reopened = Database::open(s._dir.path()).unwrap();
        assert!(reopened.is_seen(CHAT, &addr, "t1").await);
    }

    /// Removes the address in the middle of fetching it.
    struct RemovingGateway {
        db: Arc<Database>,
        inner: FakeGateway,
    }

    impl ChainGateway for RemovingGateway {
        async fn fetch_recent_transactions(&self, address: &DashAddress) -> Vec<Transaction> {
            self.db.remove_address(CHAT, address.as_str()).await.unwrap();
            self.inner.fetch_recent_transactions(address).await
        }
        async fn fetch_exchange_rate(&self) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn removed_mid_fetch_is_left_alone() {
        let addr = address(1);
        let s = Setup::new(&[addr.clone()]).await;
        let gateway = RemovingGateway {
            db: s.db.clone(),
            inner: FakeGateway::default(),
        };
        gateway.inner.serve(&addr, vec![paying("t1", &addr, 1)]);

        let report = run_cycle(&s.db, &gateway, &s.sink, &mut RateCache::default())
            .await
            .unwrap();
        assert_eq!(report.alerts_sent, 0);
        assert!(s.db.lock().await.seen.history(CHAT, &addr).is_empty());
    }

    #[tokio::test]
    async fn spinloop_stops_with_the_database() {
        let s = Setup::new(&[]).await;
        let weak = Arc::downgrade(&s.db);
        drop(s);
        let timing = PollTiming {
            interval: Duration::from_millis(1),
            backoff: Duration::from_millis(1),
        };
        // Returns right away instead of looping forever.
        tokio::time::timeout(
            Duration::from_secs(5),
            poll_spinloop(weak, Arc::new(FakeGateway::default()), FakeSink::default(), timing),
        )
        .await
        .unwrap();
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{keys, CHANNEL_CAPACITY};
use crate::error::{AppError, Result};
use crate::store::{load_json, save_json, KvStore};
use crate::types::{
    now_ms, Bet, BetStatus, BettingOption, CurrencySettings, LiveStream, NewBet, NewTransaction,
    Transaction, TxStatus,
};

/// Published after every committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    BettingOptions,
    LiveStreams,
    CurrencySettings,
    Transactions,
    Bets,
    /// A new transaction is waiting for admin review.
    Notification,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// SiteState
// ---------------------------------------------------------------------------

/// In-memory mirror of the global lists. Each list has its own lock and every
/// committed mutation writes the whole list back to the store before the lock
/// is released.
///
/// Mutators take a closure over a copy of the entity (or list) and commit it
/// only if the closure returns `Ok`, so a rejected operation leaves no trace.
pub struct SiteState {
    kv: Arc<dyn KvStore>,
    options: Mutex<Vec<BettingOption>>,
    streams: Mutex<Vec<LiveStream>>,
    currency: Mutex<CurrencySettings>,
    transactions: Mutex<Vec<Transaction>>,
    bets: Mutex<Vec<Bet>>,
    has_new_notifications: AtomicBool,
    changes: broadcast::Sender<StateChange>,
}

impl SiteState {
    /// Reads every list from the store. Missing or malformed records start
    /// empty (or with default currency settings).
    pub fn load(kv: Arc<dyn KvStore>) -> Arc<Self> {
        let options: Vec<BettingOption> =
            load_json(kv.as_ref(), keys::BETTING_OPTIONS).unwrap_or_default();
        let streams: Vec<LiveStream> = load_json(kv.as_ref(), keys::LIVE_STREAMS).unwrap_or_default();
        let currency: CurrencySettings =
            load_json(kv.as_ref(), keys::CURRENCY_SETTINGS).unwrap_or_default();
        let transactions: Vec<Transaction> =
            load_json(kv.as_ref(), keys::TRANSACTIONS).unwrap_or_default();
        let bets: Vec<Bet> = load_json(kv.as_ref(), keys::BETS).unwrap_or_default();

        let pending_tx = transactions.iter().filter(|t| t.status == TxStatus::Pending).count();
        info!(
            options = options.len(),
            streams = streams.len(),
            transactions = transactions.len(),
            bets = bets.len(),
            "[STATE] loaded site state ({pending_tx} transactions awaiting review)"
        );

        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            kv,
            options: Mutex::new(options),
            streams: Mutex::new(streams),
            currency: Mutex::new(currency),
            transactions: Mutex::new(transactions),
            bets: Mutex::new(bets),
            has_new_notifications: AtomicBool::new(pending_tx > 0),
            changes,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T, change: StateChange) -> Result<()> {
        save_json(self.kv.as_ref(), key, value)?;
        // No subscribers is fine.
        let _ = self.changes.send(change);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Betting options / live streams
    // -----------------------------------------------------------------------

    pub fn betting_options(&self) -> Vec<BettingOption> {
        lock(&self.options).clone()
    }

    pub fn betting_option(&self, id: u64) -> Option<BettingOption> {
        lock(&self.options).iter().find(|o| o.id == id).cloned()
    }

    pub fn live_streams(&self) -> Vec<LiveStream> {
        lock(&self.streams).clone()
    }

    /// Edits options and streams together. Both locks are held (options
    /// first) and both lists are persisted only if `f` succeeds.
    pub fn with_catalog<R>(
        &self,
        f: impl FnOnce(&mut Vec<BettingOption>, &mut Vec<LiveStream>) -> Result<R>,
    ) -> Result<R> {
        let mut options = lock(&self.options);
        let mut streams = lock(&self.streams);
        let mut next_options = options.clone();
        let mut next_streams = streams.clone();

        let out = f(&mut next_options, &mut next_streams)?;

        if next_options != *options {
            self.persist(keys::BETTING_OPTIONS, &next_options, StateChange::BettingOptions)?;
            *options = next_options;
        }
        if next_streams != *streams {
            self.persist(keys::LIVE_STREAMS, &next_streams, StateChange::LiveStreams)?;
            *streams = next_streams;
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Currency settings
    // -----------------------------------------------------------------------

    pub fn currency_settings(&self) -> CurrencySettings {
        lock(&self.currency).clone()
    }

    pub fn replace_currency_settings(&self, settings: CurrencySettings) -> Result<()> {
        settings.validate()?;
        let mut current = lock(&self.currency);
        self.persist(keys::CURRENCY_SETTINGS, &settings, StateChange::CurrencySettings)?;
        *current = settings;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    pub fn transactions(&self) -> Vec<Transaction> {
        lock(&self.transactions).clone()
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        lock(&self.transactions).iter().find(|t| t.id == id).cloned()
    }

    /// Appends a pending transaction with a fresh id and timestamp and raises
    /// the admin notification flag.
    pub fn add_transaction(&self, fields: NewTransaction) -> Result<Transaction> {
        let tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: fields.user_id,
            user_name: fields.user_name,
            kind: fields.kind,
            amount: fields.amount,
            status: TxStatus::Pending,
            phone_number: fields.phone_number,
            receipt_image: fields.receipt_image,
            timestamp: now_ms(),
            notes: None,
        };

        let mut list = lock(&self.transactions);
        list.push(tx.clone());
        if let Err(e) = self.persist(keys::TRANSACTIONS, &*list, StateChange::Transactions) {
            list.pop();
            return Err(e);
        }
        drop(list);

        self.has_new_notifications.store(true, Ordering::Relaxed);
        let _ = self.changes.send(StateChange::Notification);
        debug!(tx_id = %tx.id, kind = %tx.kind, "[STATE] transaction added");
        Ok(tx)
    }

    /// Applies `f` to the transaction with `id` under the list lock.
    pub fn update_transaction<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        let mut list = lock(&self.transactions);
        let Some(idx) = list.iter().position(|t| t.id == id) else {
            warn!(tx_id = id, "[STATE] update on unknown transaction");
            return Err(AppError::NotFound(format!("transaction {id}")));
        };
        let mut next = list[idx].clone();
        let out = f(&mut next)?;
        let prev = std::mem::replace(&mut list[idx], next);
        if let Err(e) = self.persist(keys::TRANSACTIONS, &*list, StateChange::Transactions) {
            list[idx] = prev;
            return Err(e);
        }
        Ok(out)
    }

    pub fn has_new_notifications(&self) -> bool {
        self.has_new_notifications.load(Ordering::Relaxed)
    }

    pub fn clear_notifications(&self) {
        self.has_new_notifications.store(false, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Bets
    // -----------------------------------------------------------------------

    pub fn bets(&self) -> Vec<Bet> {
        lock(&self.bets).clone()
    }

    pub fn bet(&self, id: &str) -> Option<Bet> {
        lock(&self.bets).iter().find(|b| b.id == id).cloned()
    }

    pub fn has_bet(&self, user_id: &str, event_id: u64) -> bool {
        lock(&self.bets)
            .iter()
            .any(|b| b.user_id == user_id && b.event_id == event_id)
    }

    /// Appends a pending bet. At most one bet per (user, event) is accepted;
    /// the check and the append happen under the same lock.
    pub fn add_bet(&self, fields: NewBet) -> Result<Bet> {
        let mut list = lock(&self.bets);
        if list
            .iter()
            .any(|b| b.user_id == fields.user_id && b.event_id == fields.event_id)
        {
            return Err(AppError::DuplicateBet(fields.event_id));
        }

        let bet = Bet {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: fields.user_id,
            user_name: fields.user_name,
            event_id: fields.event_id,
            event_title: fields.event_title,
            selection: fields.selection,
            odds: fields.odds,
            amount: fields.amount,
            potential_win: fields.potential_win,
            status: BetStatus::Pending,
            timestamp: now_ms(),
        };
        list.push(bet.clone());
        if let Err(e) = self.persist(keys::BETS, &*list, StateChange::Bets) {
            list.pop();
            return Err(e);
        }
        Ok(bet)
    }

    /// Applies `f` to the bet with `id` under the list lock.
    pub fn update_bet<R>(&self, id: &str, f: impl FnOnce(&mut Bet) -> Result<R>) -> Result<R> {
        let mut list = lock(&self.bets);
        let Some(idx) = list.iter().position(|b| b.id == id) else {
            warn!(bet_id = id, "[STATE] update on unknown bet");
            return Err(AppError::NotFound(format!("bet {id}")));
        };
        let mut next = list[idx].clone();
        let out = f(&mut next)?;
        let prev = std::mem::replace(&mut list[idx], next);
        if let Err(e) = self.persist(keys::BETS, &*list, StateChange::Bets) {
            list[idx] = prev;
            return Err(e);
        }
        Ok(out)
    }

    /// Runs `f` over the whole bet list in one locked pass.
    pub fn update_bets<R>(&self, f: impl FnOnce(&mut Vec<Bet>) -> Result<R>) -> Result<R> {
        let mut list = lock(&self.bets);
        let mut next = list.clone();
        let out = f(&mut next)?;
        if next != *list {
            self.persist(keys::BETS, &next, StateChange::Bets)?;
            *list = next;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use crate::types::TxKind;

    fn state() -> (Arc<MemoryKv>, Arc<SiteState>) {
        let kv = MemoryKv::new();
        let state = SiteState::load(kv.clone());
        (kv, state)
    }

    fn new_bet(user: &str, event_id: u64) -> NewBet {
        NewBet {
            user_id: user.into(),
            user_name: "User".into(),
            event_id,
            event_title: "Event".into(),
            selection: "Red".into(),
            odds: 2.0,
            amount: 10.0,
            potential_win: 20.0,
        }
    }

    fn deposit(user: &str) -> NewTransaction {
        NewTransaction {
            user_id: user.into(),
            user_name: "User".into(),
            kind: TxKind::Deposit,
            amount: 100.0,
            phone_number: None,
            receipt_image: Some("data:image/png;base64,AAAA".into()),
        }
    }

    #[test]
    fn load_seeds_defaults_when_store_is_empty() {
        let (_, state) = state();
        assert!(state.betting_options().is_empty());
        assert!(state.bets().is_empty());
        assert_eq!(state.currency_settings(), CurrencySettings::default());
        assert!(!state.has_new_notifications());
    }

    #[test]
    fn malformed_list_resets_to_empty() {
        let kv = MemoryKv::new();
        kv.set(keys::BETS, b"{broken".to_vec());
        let state = SiteState::load(kv);
        assert!(state.bets().is_empty());
    }

    #[test]
    fn add_transaction_persists_and_raises_notification() {
        let (kv, state) = state();
        let mut rx = state.subscribe();
        let tx = state.add_transaction(deposit("a@x.com")).unwrap();

        assert_eq!(tx.status, TxStatus::Pending);
        assert!(!tx.id.is_empty());
        assert!(state.has_new_notifications());

        let stored: Vec<Transaction> = load_json(kv.as_ref(), keys::TRANSACTIONS).unwrap();
        assert_eq!(stored, vec![tx]);
        assert_eq!(rx.try_recv().unwrap(), StateChange::Transactions);
        assert_eq!(rx.try_recv().unwrap(), StateChange::Notification);

        state.clear_notifications();
        assert!(!state.has_new_notifications());
    }

    #[test]
    fn update_unknown_transaction_is_not_found() {
        let (_, state) = state();
        let err = state.update_transaction("nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn failed_update_leaves_entity_untouched() {
        let (_, state) = state();
        let tx = state.add_transaction(deposit("a@x.com")).unwrap();
        let res: Result<()> = state.update_transaction(&tx.id, |t| {
            t.status = TxStatus::Approved;
            Err(AppError::InvalidInput("abort".into()))
        });
        assert!(res.is_err());
        assert_eq!(state.transaction(&tx.id).unwrap().status, TxStatus::Pending);
    }

    #[test]
    fn second_bet_on_same_event_is_rejected() {
        let (_, state) = state();
        state.add_bet(new_bet("a@x.com", 1)).unwrap();
        let err = state.add_bet(new_bet("a@x.com", 1)).unwrap_err();
        assert!(matches!(err, AppError::DuplicateBet(1)));
        // Other users and other events are unaffected.
        state.add_bet(new_bet("b@x.com", 1)).unwrap();
        state.add_bet(new_bet("a@x.com", 2)).unwrap();
        assert_eq!(state.bets().len(), 3);
        assert!(state.has_bet("a@x.com", 2));
    }

    #[test]
    fn state_survives_reload() {
        let (kv, state) = state();
        let bet = state.add_bet(new_bet("a@x.com", 7)).unwrap();
        state
            .update_bet(&bet.id, |b| {
                b.status = BetStatus::Won;
                Ok(())
            })
            .unwrap();

        let reloaded = SiteState::load(kv);
        assert_eq!(reloaded.bet(&bet.id).unwrap().status, BetStatus::Won);
    }

    #[test]
    fn catalog_edit_rolls_back_on_error() {
        let (_, state) = state();
        let res: Result<()> = state.with_catalog(|options, _| {
            options.push(BettingOption {
                id: 1,
                title: "t".into(),
                description: String::new(),
                option1: "a".into(),
                option2: "b".into(),
                odds1: 1.5,
                odds2: 1.5,
                active: true,
                live_stream: false,
            });
            Err(AppError::InvalidInput("abort".into()))
        });
        assert!(res.is_err());
        assert!(state.betting_options().is_empty());
    }

    #[test]
    fn currency_settings_are_validated_before_replace() {
        let (_, state) = state();
        let mut s = CurrencySettings::default();
        s.min_deposit = 0.0;
        assert!(state.replace_currency_settings(s).is_err());
        assert_eq!(state.currency_settings(), CurrencySettings::default());
    }
}

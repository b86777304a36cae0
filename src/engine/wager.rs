use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accounts::AccountBook;
use crate::config::MIN_BET_AMOUNT;
use crate::error::{AppError, Result};
use crate::state::SiteState;
use crate::types::{round_cents, Bet, BetOutcome, BetStatus, NewBet, Side};

/// Snapshot of the bets a bulk settlement will pay out, taken when the admin
/// asks for confirmation. Confirming settles exactly these ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPreview {
    pub event_id: u64,
    pub side: Side,
    /// Outcome text at preview time.
    pub selection: String,
    pub bet_ids: Vec<String>,
    pub total_payout: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub settled: usize,
    /// Snapshot ids that were no longer pending or did not match the
    /// previewed event and selection.
    pub skipped: usize,
    pub total_payout: f64,
    pub users_credited: usize,
}

pub struct WagerEngine {
    state: Arc<SiteState>,
    accounts: Arc<AccountBook>,
}

impl WagerEngine {
    pub fn new(state: Arc<SiteState>, accounts: Arc<AccountBook>) -> Self {
        Self { state, accounts }
    }

    /// Places a pending bet and debits the stake. The balance check, the bet
    /// append and the debit all happen under the account lock.
    pub fn place_bet(
        &self,
        email: Option<&str>,
        event_id: u64,
        selection: &str,
        stake: f64,
    ) -> Result<Bet> {
        let email = email.ok_or(AppError::NotAuthenticated)?;
        let option = self
            .state
            .betting_option(event_id)
            .ok_or_else(|| AppError::NotFound(format!("betting option {event_id}")))?;
        if !option.active {
            return Err(AppError::OptionInactive(event_id));
        }
        let side = option
            .side_of(selection)
            .ok_or_else(|| AppError::InvalidSelection(selection.to_string()))?;
        if self.state.has_bet(email, event_id) {
            return Err(AppError::DuplicateBet(event_id));
        }
        if !(stake >= MIN_BET_AMOUNT) || !stake.is_finite() {
            return Err(AppError::BelowMinimum { min: MIN_BET_AMOUNT });
        }

        let odds = option.odds(side);
        let result = self.accounts.with_account(email, |account| {
            if stake > account.balance {
                return Err(AppError::InsufficientFunds {
                    balance: account.balance,
                    requested: stake,
                });
            }
            let bet = self.state.add_bet(NewBet {
                user_id: account.email.clone(),
                user_name: account.name.clone(),
                event_id,
                event_title: option.title.clone(),
                selection: option.outcome(side).to_string(),
                odds,
                amount: stake,
                potential_win: round_cents(stake * odds),
            })?;
            account.apply_delta(-stake);
            Ok(bet)
        });

        let bet = match result {
            Ok(bet) => bet,
            Err(AppError::NotFound(_)) => return Err(AppError::NotAuthenticated),
            Err(e) => {
                warn!(email, event_id, stake, "[WAGER] bet rejected: {e}");
                return Err(e);
            }
        };
        info!(
            bet_id = %bet.id,
            email,
            event_id,
            side = %side,
            stake,
            potential_win = bet.potential_win,
            "[WAGER] bet placed"
        );
        Ok(bet)
    }

    /// Settles one pending bet. A won bet credits its potential win.
    pub fn settle_bet(&self, bet_id: &str, outcome: BetOutcome) -> Result<Bet> {
        let bet = self
            .state
            .update_bet(bet_id, |b| {
                if b.status != BetStatus::Pending {
                    return Err(AppError::AlreadySettled(format!("bet {}", b.id)));
                }
                b.status = outcome.into();
                Ok(b.clone())
            })
            .inspect_err(|e| warn!(bet_id, "[WAGER] settlement rejected: {e}"))?;

        if outcome == BetOutcome::Won {
            self.credit(&bet.user_id, bet.potential_win);
        }
        info!(bet_id, email = %bet.user_id, status = %bet.status, "[WAGER] bet settled");
        Ok(bet)
    }

    fn credit(&self, email: &str, amount: f64) {
        // The account may have been deleted by an admin since the bet was placed.
        if let Err(e) = self.accounts.apply_balance_delta(email, amount) {
            warn!(email, amount, "[WAGER] payout not credited: {e}");
        }
    }

    /// Pending bets on `side` of `event_id`, as they stand now.
    pub fn preview_settlement(&self, event_id: u64, side: Side) -> Result<SettlementPreview> {
        let option = self
            .state
            .betting_option(event_id)
            .ok_or_else(|| AppError::NotFound(format!("betting option {event_id}")))?;
        let selection = option.outcome(side).to_string();

        let matching: Vec<Bet> = self
            .state
            .bets()
            .into_iter()
            .filter(|b| b.status == BetStatus::Pending && b.event_id == event_id && b.selection == selection)
            .collect();

        Ok(SettlementPreview {
            event_id,
            side,
            selection,
            total_payout: round_cents(matching.iter().map(|b| b.potential_win).sum()),
            bet_ids: matching.into_iter().map(|b| b.id).collect(),
        })
    }

    /// Marks every bet of the snapshot that is still pending as won in a
    /// single pass over the bet list, then credits each user once with their
    /// combined payout. Ids that are not pending bets on the previewed event
    /// and selection are skipped.
    pub fn confirm_settlement(&self, preview: &SettlementPreview) -> Result<SettlementReport> {
        let (payouts, skipped) = self.state.update_bets(|bets| {
            let mut payouts: BTreeMap<String, f64> = BTreeMap::new();
            let mut skipped = 0;
            for id in &preview.bet_ids {
                match bets.iter_mut().find(|b| &b.id == id) {
                    Some(b)
                        if b.status == BetStatus::Pending
                            && b.event_id == preview.event_id
                            && b.selection == preview.selection =>
                    {
                        b.status = BetStatus::Won;
                        *payouts.entry(b.user_id.clone()).or_default() += b.potential_win;
                    }
                    _ => skipped += 1,
                }
            }
            Ok((payouts, skipped))
        })?;

        let mut report = SettlementReport {
            settled: preview.bet_ids.len() - skipped,
            skipped,
            ..Default::default()
        };
        for (email, amount) in &payouts {
            self.credit(email, *amount);
            report.total_payout += amount;
        }
        report.total_payout = round_cents(report.total_payout);
        report.users_credited = payouts.len();

        info!(
            event_id = preview.event_id,
            side = %preview.side,
            settled = report.settled,
            skipped = report.skipped,
            total_payout = report.total_payout,
            "[WAGER] bulk settlement complete"
        );
        Ok(report)
    }

    /// Preview and confirm in one step.
    pub fn settle_all_pending(&self, event_id: u64, side: Side) -> Result<SettlementReport> {
        let preview = self.preview_settlement(event_id, side)?;
        self.confirm_settlement(&preview)
    }

    /// A user's bets, newest first.
    pub fn bets_for_user(&self, email: &str) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .state
            .bets()
            .into_iter()
            .filter(|b| b.user_id == email)
            .collect();
        bets.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        bets
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use crate::engine::Catalog;
    use crate::types::BettingOption;
    use std::thread;

    struct Fixture {
        state: Arc<SiteState>,
        accounts: Arc<AccountBook>,
        catalog: Catalog,
        engine: Arc<WagerEngine>,
    }

    fn fixture() -> Fixture {
        let kv = MemoryKv::new();
        let state = SiteState::load(kv.clone());
        let accounts = AccountBook::new(kv);
        let catalog = Catalog::new(Arc::clone(&state));
        catalog
            .replace_options(vec![BettingOption {
                id: 1,
                title: "Red vs Blue".into(),
                description: String::new(),
                option1: "Red".into(),
                option2: "Blue".into(),
                odds1: 2.5,
                odds2: 1.5,
                active: true,
                live_stream: false,
            }])
            .unwrap();
        let engine = Arc::new(WagerEngine::new(Arc::clone(&state), Arc::clone(&accounts)));
        Fixture { state, accounts, catalog, engine }
    }

    fn user(f: &Fixture, email: &str, balance: f64) {
        f.accounts.sign_up("User", email, "pw", "pw").unwrap();
        f.accounts.apply_balance_delta(email, balance).unwrap();
    }

    fn balance(f: &Fixture, email: &str) -> f64 {
        f.accounts.account(email).unwrap().balance
    }

    #[test]
    fn place_then_win_then_settle_again() {
        let f = fixture();
        user(&f, "ana@x.com", 100.0);

        let bet = f.engine.place_bet(Some("ana@x.com"), 1, "Red", 30.0).unwrap();
        assert_eq!(balance(&f, "ana@x.com"), 70.0);
        assert_eq!(bet.potential_win, 75.0);
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(f.state.bets().len(), 1);

        let settled = f.engine.settle_bet(&bet.id, BetOutcome::Won).unwrap();
        assert_eq!(settled.status, BetStatus::Won);
        assert_eq!(balance(&f, "ana@x.com"), 145.0);

        let err = f.engine.settle_bet(&bet.id, BetOutcome::Won).unwrap_err();
        assert!(matches!(err, AppError::AlreadySettled(_)));
        assert_eq!(balance(&f, "ana@x.com"), 145.0);
    }

    #[test]
    fn lost_bet_keeps_stake() {
        let f = fixture();
        user(&f, "ana@x.com", 50.0);
        let bet = f.engine.place_bet(Some("ana@x.com"), 1, "Blue", 20.0).unwrap();
        f.engine.settle_bet(&bet.id, BetOutcome::Lost).unwrap();
        assert_eq!(balance(&f, "ana@x.com"), 30.0);
        assert_eq!(f.state.bet(&bet.id).unwrap().status, BetStatus::Lost);
    }

    #[test]
    fn placement_rejections_leave_no_trace() {
        let f = fixture();
        user(&f, "ana@x.com", 50.0);

        assert!(matches!(
            f.engine.place_bet(None, 1, "Red", 20.0),
            Err(AppError::NotAuthenticated)
        ));
        assert!(matches!(
            f.engine.place_bet(Some("ana@x.com"), 1, "Red", 9.99),
            Err(AppError::BelowMinimum { .. })
        ));
        assert!(matches!(
            f.engine.place_bet(Some("ana@x.com"), 1, "Red", 50.01),
            Err(AppError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            f.engine.place_bet(Some("ana@x.com"), 1, "Green", 20.0),
            Err(AppError::InvalidSelection(_))
        ));
        assert!(matches!(
            f.engine.place_bet(Some("ana@x.com"), 9, "Red", 20.0),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.place_bet(Some("ghost@x.com"), 1, "Red", 20.0),
            Err(AppError::NotAuthenticated)
        ));

        assert!(f.state.bets().is_empty());
        assert_eq!(balance(&f, "ana@x.com"), 50.0);
    }

    #[test]
    fn second_bet_on_event_is_rejected() {
        let f = fixture();
        user(&f, "ana@x.com", 100.0);
        f.engine.place_bet(Some("ana@x.com"), 1, "Red", 10.0).unwrap();
        let err = f.engine.place_bet(Some("ana@x.com"), 1, "Blue", 10.0).unwrap_err();
        assert!(matches!(err, AppError::DuplicateBet(1)));
        assert_eq!(balance(&f, "ana@x.com"), 90.0);
    }

    #[test]
    fn inactive_option_takes_no_bets() {
        let f = fixture();
        user(&f, "ana@x.com", 100.0);
        let mut options = f.state.betting_options();
        options[0].active = false;
        f.catalog.replace_options(options).unwrap();
        assert!(matches!(
            f.engine.place_bet(Some("ana@x.com"), 1, "Red", 10.0),
            Err(AppError::OptionInactive(1))
        ));
    }

    #[test]
    fn concurrent_placements_cannot_overdraw() {
        let f = fixture();
        user(&f, "ana@x.com", 100.0);
        // Ten options so each thread can bet on a different event.
        let options: Vec<BettingOption> = (1..=10)
            .map(|id| BettingOption {
                id,
                title: format!("Event {id}"),
                description: String::new(),
                option1: "Red".into(),
                option2: "Blue".into(),
                odds1: 2.0,
                odds2: 2.0,
                active: true,
                live_stream: false,
            })
            .collect();
        f.catalog.replace_options(options).unwrap();

        let handles: Vec<_> = (1..=10u64)
            .map(|id| {
                let engine = Arc::clone(&f.engine);
                thread::spawn(move || engine.place_bet(Some("ana@x.com"), id, "Red", 30.0).is_ok())
            })
            .collect();
        let placed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(placed, 3);
        assert_eq!(balance(&f, "ana@x.com"), 10.0);
    }

    #[test]
    fn bulk_settlement_pays_snapshot_once() {
        let f = fixture();
        user(&f, "a@x.com", 100.0);
        user(&f, "b@x.com", 100.0);
        user(&f, "c@x.com", 100.0);
        let a = f.engine.place_bet(Some("a@x.com"), 1, "Red", 20.0).unwrap();
        let b = f.engine.place_bet(Some("b@x.com"), 1, "Red", 40.0).unwrap();
        f.engine.place_bet(Some("c@x.com"), 1, "Blue", 40.0).unwrap();

        let preview = f.engine.preview_settlement(1, Side::Option1).unwrap();
        assert_eq!(preview.bet_ids.len(), 2);
        assert_eq!(preview.total_payout, 150.0);

        // One bet is settled individually between preview and confirmation.
        f.engine.settle_bet(&a.id, BetOutcome::Lost).unwrap();

        let report = f.engine.confirm_settlement(&preview).unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total_payout, 100.0);
        assert_eq!(balance(&f, "a@x.com"), 80.0);
        assert_eq!(balance(&f, "b@x.com"), 160.0);
        assert_eq!(balance(&f, "c@x.com"), 60.0);
        assert_eq!(f.state.bet(&b.id).unwrap().status, BetStatus::Won);

        // Running it again finds nothing pending.
        let again = f.engine.settle_all_pending(1, Side::Option1).unwrap();
        assert_eq!(again.settled, 0);
        assert_eq!(balance(&f, "b@x.com"), 160.0);
    }

    #[test]
    fn confirmation_skips_bets_outside_the_previewed_event_and_side() {
        let f = fixture();
        let mut options = f.state.betting_options();
        let mut second = options[0].clone();
        second.id = 2;
        options.push(second);
        f.catalog.replace_options(options).unwrap();
        user(&f, "a@x.com", 100.0);
        user(&f, "b@x.com", 100.0);
        let red = f.engine.place_bet(Some("a@x.com"), 1, "Red", 20.0).unwrap();
        let blue = f.engine.place_bet(Some("a@x.com"), 2, "Blue", 50.0).unwrap();
        let losing = f.engine.place_bet(Some("b@x.com"), 1, "Blue", 50.0).unwrap();

        let mut preview = f.engine.preview_settlement(1, Side::Option1).unwrap();
        assert_eq!(preview.bet_ids, vec![red.id.clone()]);
        preview.bet_ids.push(blue.id.clone());
        preview.bet_ids.push(losing.id.clone());

        let report = f.engine.confirm_settlement(&preview).unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.total_payout, 50.0);
        assert_eq!(balance(&f, "a@x.com"), 80.0);
        assert_eq!(balance(&f, "b@x.com"), 50.0);
        assert_eq!(f.state.bet(&blue.id).unwrap().status, BetStatus::Pending);
        assert_eq!(f.state.bet(&losing.id).unwrap().status, BetStatus::Pending);
    }

    #[test]
    fn snapshot_ignores_later_outcome_renames() {
        let f = fixture();
        user(&f, "a@x.com", 100.0);
        f.engine.place_bet(Some("a@x.com"), 1, "Red", 20.0).unwrap();
        let preview = f.engine.preview_settlement(1, Side::Option1).unwrap();

        let mut options = f.state.betting_options();
        options[0].option1 = "Crimson".into();
        f.catalog.replace_options(options).unwrap();

        let report = f.engine.confirm_settlement(&preview).unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(balance(&f, "a@x.com"), 130.0);
    }

    #[test]
    fn history_is_newest_first_and_per_user() {
        let f = fixture();
        user(&f, "a@x.com", 100.0);
        user(&f, "b@x.com", 100.0);
        f.engine.place_bet(Some("a@x.com"), 1, "Red", 10.0).unwrap();
        f.engine.place_bet(Some("b@x.com"), 1, "Red", 10.0).unwrap();
        let mine = f.engine.bets_for_user("a@x.com");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, "a@x.com");
    }
}

use crate::{
    activity::{
        ActivityEntry,
        ActivityLog,
        describe_event,
    },
    chain::{
        ChainClient,
        Receipt,
        WriteCall,
    },
    codec::{
        ppm_from_percent,
        short_hash,
        to_base_units,
        to_decimal_string,
    },
    error::{
        ClientError,
        Result,
    },
    sync::Synchronizer,
};
use chrono::{
    DateTime,
    Utc,
};
use ethers::types::{
    Address,
    H256,
    U256,
};
use lottery_abi::{
    LotteryEvent,
    decode_log,
};
use rand::Rng;
use std::{
    fmt,
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
};
use tokio::sync::watch;
use tracing::{
    error,
    info,
    warn,
};

const SALT_BITS: u32 = 48;

#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    Failed,
    Rejected,
}

impl Phase {
    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::AwaitingConfirmation)
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Action {
    /// `salt: None` draws a random 48-bit salt.
    Play {
        salt: Option<U256>,
    },
    Claim,
    Fund {
        amount: String,
    },
    SetParams {
        prize: String,
        entry_fee: String,
        win_chance_percent: String,
    },
    Withdraw {
        amount: String,
    },
}

impl Action {
    pub fn kind(&self) -> TxKind {
        match self {
            Action::Play { .. } => TxKind::Play,
            Action::Claim => TxKind::Claim,
            Action::Fund { .. } => TxKind::Fund,
            Action::SetParams { .. } => TxKind::SetParams,
            Action::Withdraw { .. } => TxKind::Withdraw,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum TxKind {
    Play,
    Claim,
    Fund,
    SetParams,
    Withdraw,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxKind::Play => "play",
            TxKind::Claim => "claim",
            TxKind::Fund => "fund",
            TxKind::SetParams => "setParams",
            TxKind::Withdraw => "withdraw",
        };
        f.write_str(name)
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    Rejected,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct DecodedOutcome {
    pub won: bool,
    pub prize_paid: U256,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TransactionRecord {
    kind: TxKind,
    tx_hash: Option<H256>,
    submitted_at: DateTime<Utc>,
    status: TxStatus,
    outcome: Option<DecodedOutcome>,
    message: String,
}

impl TransactionRecord {
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    pub fn tx_hash(&self) -> Option<H256> {
        self.tx_hash
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<DecodedOutcome> {
        self.outcome
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct PendingRecord {
    kind: TxKind,
    tx_hash: Option<H256>,
    submitted_at: DateTime<Utc>,
}

impl PendingRecord {
    fn new(kind: TxKind) -> Self {
        Self {
            kind,
            tx_hash: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TxStatus {
        TxStatus::Pending
    }

    pub fn finalize(
        self,
        status: TxStatus,
        outcome: Option<DecodedOutcome>,
        message: impl Into<String>,
    ) -> TransactionRecord {
        TransactionRecord {
            kind: self.kind,
            tx_hash: self.tx_hash,
            submitted_at: self.submitted_at,
            status,
            outcome,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct Prepared {
    kind: TxKind,
    call: WriteCall,
    value: U256,
    label: String,
}

impl Prepared {
    fn submitted_text(&self, hash: H256) -> String {
        match self.kind {
            TxKind::Play | TxKind::Claim => {
                format!("{}(tx: {})", self.label, short_hash(hash))
            }
            _ => format!("{} (tx: {})", self.label, short_hash(hash)),
        }
    }
}

struct FlightGuard<'a> {
    in_flight: &'a AtomicBool,
    phase: &'a watch::Sender<Phase>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_if_modified(|phase| {
            if phase.is_busy() {
                *phase = Phase::Idle;
                true
            } else {
                false
            }
        });
        self.in_flight.store(false, Ordering::Release);
    }
}

fn random_salt() -> U256 {
    U256::from(rand::rng().random_range(0..1u64 << SALT_BITS))
}

fn play_outcome(events: &[LotteryEvent], player: Address) -> Option<DecodedOutcome> {
    let won = events.iter().find_map(|event| match event {
        LotteryEvent::Result {
            player: who, won, ..
        } if *who == player => Some(*won),
        _ => None,
    })?;
    let prize_paid = events
        .iter()
        .filter_map(|event| match event {
            LotteryEvent::PrizePaid { to, amount } if *to == player => Some(*amount),
            _ => None,
        })
        .fold(U256::zero(), |total, amount| total.saturating_add(amount));
    Some(DecodedOutcome { won, prize_paid })
}

fn play_message(outcome: Option<DecodedOutcome>) -> String {
    match outcome {
        Some(DecodedOutcome {
            won: true,
            prize_paid,
        }) if !prize_paid.is_zero() => {
            format!("You won {} ETH!", to_decimal_string(prize_paid))
        }
        Some(DecodedOutcome { won: true, .. }) => {
            "You won! The prize is pending, claim it once the pot is funded.".to_owned()
        }
        Some(DecodedOutcome { won: false, .. }) => "No luck this time.".to_owned(),
        None => "Finished. (No Result event decoded)".to_owned(),
    }
}

pub struct TransactionController<C> {
    sync: Synchronizer<C>,
    activity: watch::Sender<ActivityLog>,
    phase: watch::Sender<Phase>,
    in_flight: AtomicBool,
}

impl<C: ChainClient> TransactionController<C> {
    pub fn new(sync: Synchronizer<C>) -> Self {
        let (activity, _) = watch::channel(ActivityLog::default());
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            sync,
            activity,
            phase,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer<C> {
        &self.sync
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn subscribe_activity(&self) -> watch::Receiver<ActivityLog> {
        self.activity.subscribe()
    }

    pub fn activity(&self) -> ActivityLog {
        self.activity.borrow().clone()
    }

    pub fn seed_activity(&self, history: Vec<ActivityEntry>) {
        self.activity.send_modify(|log| log.seed(history));
    }

    pub fn clear_activity(&self) {
        self.activity.send_modify(ActivityLog::clear);
    }

    fn record(&self, entry: ActivityEntry) {
        self.activity.send_modify(|log| log.record(entry));
    }

    fn begin(&self) -> Result<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::Busy)?;
        Ok(FlightGuard {
            in_flight: &self.in_flight,
            phase: &self.phase,
        })
    }

    fn prepare(&self, action: Action) -> Result<Prepared> {
        let state = self.sync.snapshot();
        let kind = action.kind();
        let prepared = match action {
            Action::Play { salt } => {
                let params = state.parameters().ok_or(ClientError::NotSynchronized)?;
                Prepared {
                    kind,
                    call: WriteCall::Play {
                        salt: salt.unwrap_or_else(random_salt),
                    },
                    value: params.entry_fee,
                    label: "play".to_owned(),
                }
            }
            Action::Claim => Prepared {
                kind,
                call: WriteCall::Claim,
                value: U256::zero(),
                label: "claim".to_owned(),
            },
            Action::Fund { amount } => {
                let amount = amount.trim();
                Prepared {
                    kind,
                    call: WriteCall::Fund,
                    value: to_base_units(amount)?,
                    label: format!("fund {amount} ETH"),
                }
            }
            Action::SetParams {
                prize,
                entry_fee,
                win_chance_percent,
            } => {
                let (prize, entry_fee, percent) =
                    (prize.trim(), entry_fee.trim(), win_chance_percent.trim());
                Prepared {
                    kind,
                    call: WriteCall::SetParams {
                        prize: to_base_units(prize)?,
                        entry_fee: to_base_units(entry_fee)?,
                        win_chance_ppm: ppm_from_percent(percent)?,
                    },
                    value: U256::zero(),
                    label: format!(
                        "setParams → prize {prize} ETH, fee {entry_fee} ETH, chance {percent}%"
                    ),
                }
            }
            Action::Withdraw { amount } => {
                let amount = amount.trim();
                Prepared {
                    kind,
                    call: WriteCall::Withdraw {
                        amount: to_base_units(amount)?,
                    },
                    value: U256::zero(),
                    label: format!("withdraw {amount} ETH"),
                }
            }
        };
        Ok(prepared)
    }

    /// Returns `Err` only when nothing was sent: another action is in flight,
    /// or the action failed local validation. Everything after that is
    /// reported through the returned record.
    pub async fn submit(&self, action: Action) -> Result<TransactionRecord> {
        let flight = self.begin().inspect_err(|_| {
            info!(kind = %action.kind(), "action rejected, another transaction is in flight");
        })?;
        let Some(session) = self.sync.session() else {
            self.record(ActivityEntry::new(format!(
                "Error: {}",
                ClientError::NotConnected.short_message()
            )));
            return Err(ClientError::NotConnected);
        };
        let prepared = match self.prepare(action) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(?err, "action failed validation");
                self.record(ActivityEntry::new(format!("Error: {}", err.short_message())));
                return Err(err);
            }
        };

        let mut pending = PendingRecord::new(prepared.kind);
        self.phase.send_replace(Phase::Submitting);
        info!(kind = %prepared.kind, value = %prepared.value, "submitting transaction");
        let tx = match self
            .sync
            .chain()
            .send(prepared.call.clone(), prepared.value)
            .await
        {
            Ok(tx) => tx,
            Err(ClientError::UserRejected) => {
                info!(kind = %prepared.kind, "transaction rejected in the wallet");
                self.phase.send_replace(Phase::Rejected);
                return Ok(pending.finalize(
                    TxStatus::Rejected,
                    None,
                    "Transaction rejected in the wallet",
                ));
            }
            Err(err) => {
                let message = err.short_message();
                error!(?err, kind = %prepared.kind, "transaction submission failed");
                self.record(ActivityEntry::new(format!("Error: {message}")));
                self.phase.send_replace(Phase::Failed);
                return Ok(pending.finalize(TxStatus::Failed, None, message));
            }
        };

        pending.tx_hash = Some(tx.hash);
        self.record(ActivityEntry::for_tx(prepared.submitted_text(tx.hash), tx.hash));
        self.phase.send_replace(Phase::AwaitingConfirmation);
        info!(kind = %prepared.kind, hash = ?tx.hash, "transaction submitted");

        let finalized = match self.sync.chain().wait_for_confirmation(tx).await {
            Ok(receipt) => {
                self.phase.send_replace(Phase::Confirmed);
                self.finish_confirmed(pending, &prepared, session.address, &receipt)
            }
            Err(err) => {
                let message = err.short_message();
                error!(?err, kind = %prepared.kind, hash = ?tx.hash, "transaction failed");
                self.record(ActivityEntry::for_tx(format!("Error: {message}"), tx.hash));
                self.phase.send_replace(Phase::Failed);
                pending.finalize(TxStatus::Failed, None, message)
            }
        };
        drop(flight);

        tokio::join!(
            self.sync.refresh_user(session.address),
            self.sync.refresh_global()
        );
        Ok(finalized)
    }

    fn finish_confirmed(
        &self,
        pending: PendingRecord,
        prepared: &Prepared,
        account: Address,
        receipt: &Receipt,
    ) -> TransactionRecord {
        let events: Vec<LotteryEvent> = receipt.logs.iter().map(decode_log).collect();
        for event in &events {
            if let Some(text) = describe_event(event) {
                self.record(ActivityEntry::for_tx(text, receipt.tx_hash));
            }
        }
        let (outcome, message) = match prepared.kind {
            TxKind::Play => {
                let outcome = play_outcome(&events, account);
                if outcome.is_none() {
                    warn!(hash = ?receipt.tx_hash, "confirmed play carried no Result event");
                }
                (outcome, play_message(outcome))
            }
            TxKind::Claim => (None, "Claimed (if any pending)".to_owned()),
            TxKind::Fund => (None, "Funded ✔".to_owned()),
            TxKind::SetParams => (None, "Parameters updated".to_owned()),
            TxKind::Withdraw => (None, "Withdrawal sent".to_owned()),
        };
        info!(
            kind = %prepared.kind,
            hash = ?receipt.tx_hash,
            block = receipt.block_number,
            "transaction confirmed"
        );
        pending.finalize(TxStatus::Confirmed, outcome, message)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        chain::simulated::{
            SimulatedChain,
            SimulatedConfig,
        },
        codec::{
            CodecError,
            MAX_PPM,
        },
        sync::SyncSettings,
    };
    use std::sync::Arc;

    fn alice() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn setup(config: SimulatedConfig) -> (Arc<SimulatedChain>, TransactionController<SimulatedChain>) {
        let chain = Arc::new(SimulatedChain::new(config));
        let sync = Synchronizer::new(Arc::clone(&chain), SyncSettings::default());
        (chain, TransactionController::new(sync))
    }

    async fn connected(config: SimulatedConfig) -> (Arc<SimulatedChain>, TransactionController<SimulatedChain>) {
        let (chain, controller) = setup(config);
        chain.attach_signer(alice());
        controller.synchronizer().connect(alice());
        controller.synchronizer().refresh_global().await;
        (chain, controller)
    }

    fn texts(controller: &TransactionController<SimulatedChain>) -> Vec<String> {
        controller.activity().iter().map(|e| e.text.clone()).collect()
    }

    #[test]
    fn play_outcome__sums_prizes_paid_to_the_player() {
        let player = alice();
        let other = Address::from_low_u64_be(2);
        let events = vec![
            LotteryEvent::Result {
                player,
                won: true,
                prize_amount: U256::from(10u64),
            },
            LotteryEvent::PrizePaid {
                to: player,
                amount: U256::from(4u64),
            },
            LotteryEvent::PrizePaid {
                to: other,
                amount: U256::from(100u64),
            },
            LotteryEvent::PrizePaid {
                to: player,
                amount: U256::from(6u64),
            },
        ];
        assert_eq!(
            play_outcome(&events, player),
            Some(DecodedOutcome {
                won: true,
                prize_paid: U256::from(10u64)
            })
        );
        assert_eq!(play_outcome(&events, other), None);
    }

    #[test]
    fn random_salt__stays_within_48_bits() {
        for _ in 0..32 {
            assert!(random_salt() < U256::from(1u64 << SALT_BITS));
        }
    }

    #[tokio::test]
    async fn submit__requires_connected_wallet() {
        // given
        let (chain, controller) = setup(SimulatedConfig::default());

        // when
        let result = controller.submit(Action::Claim).await;

        // then
        assert_eq!(result, Err(ClientError::NotConnected));
        assert!(chain.sent().is_empty());
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(texts(&controller), vec!["Error: wallet is not connected"]);
    }

    #[tokio::test]
    async fn submit__play_requires_synchronized_parameters() {
        // given
        let (chain, controller) = setup(SimulatedConfig::default());
        chain.attach_signer(alice());
        controller.synchronizer().connect(alice());

        // when
        let result = controller.submit(Action::Play { salt: None }).await;

        // then
        assert_eq!(result, Err(ClientError::NotSynchronized));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn submit__invalid_amount_sends_nothing_and_stays_idle() {
        // given
        let (chain, controller) = connected(SimulatedConfig::default()).await;

        // when
        let result = controller
            .submit(Action::Fund {
                amount: "lots".to_owned(),
            })
            .await;

        // then
        assert_eq!(
            result,
            Err(ClientError::InvalidAmount(CodecError::NotANumber(
                "lots".to_owned()
            )))
        );
        assert!(chain.sent().is_empty());
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(controller.activity().len(), 1);
        assert!(texts(&controller)[0].starts_with("Error: "));
    }

    #[tokio::test]
    async fn submit__confirmed_win_records_outcome_and_events() {
        // given
        let (_chain, controller) = connected(SimulatedConfig {
            win_chance_ppm: MAX_PPM,
            ..SimulatedConfig::default()
        })
        .await;

        // when
        let record = controller
            .submit(Action::Play {
                salt: Some(U256::from(9u64)),
            })
            .await
            .unwrap();

        // then
        assert_eq!(record.status(), TxStatus::Confirmed);
        assert_eq!(
            record.outcome(),
            Some(DecodedOutcome {
                won: true,
                prize_paid: U256::exp10(14)
            })
        );
        assert_eq!(record.message(), "You won 0.000100 ETH!");
        assert_eq!(controller.phase(), Phase::Confirmed);
        assert_eq!(
            texts(&controller),
            vec![
                "PrizePaid → 0.000100 ETH".to_owned(),
                "Result → WIN 0.000100 ETH".to_owned(),
                format!("play(tx: {})", short_hash(record.tx_hash().unwrap())),
            ]
        );
    }

    #[tokio::test]
    async fn submit__refreshes_user_state_after_confirmation() {
        // given
        let (chain, controller) = connected(SimulatedConfig::default()).await;

        // when
        controller.submit(Action::Play { salt: None }).await.unwrap();

        // then
        let state = controller.synchronizer().snapshot();
        let user = state.user.unwrap();
        assert_eq!(user.last_played_block, chain.block());
        assert!(!user.can_play_now);
        assert_eq!(state.global.current_block, Some(chain.block()));
    }

    #[tokio::test]
    async fn submit__revert_is_failed_and_logged() {
        // given
        let (_chain, controller) = connected(SimulatedConfig::default()).await;

        // when
        let record = controller
            .submit(Action::Withdraw {
                amount: "0.001".to_owned(),
            })
            .await
            .unwrap();

        // then
        assert_eq!(record.status(), TxStatus::Failed);
        assert_eq!(record.message(), "caller is not the owner");
        assert_eq!(controller.phase(), Phase::Failed);
        assert_eq!(texts(&controller)[0], "Error: caller is not the owner");
    }

    #[tokio::test]
    async fn submit__rejection_is_silent_and_frees_the_slot() {
        // given
        let (chain, controller) = connected(SimulatedConfig::default()).await;
        chain.reject_next_send();

        // when
        let rejected = controller.submit(Action::Claim).await.unwrap();
        let next = controller.submit(Action::Claim).await.unwrap();

        // then
        assert_eq!(rejected.status(), TxStatus::Rejected);
        assert_eq!(rejected.tx_hash(), None);
        assert_eq!(next.status(), TxStatus::Confirmed);
        assert!(texts(&controller).iter().all(|t| !t.starts_with("Error")));
    }

    #[tokio::test]
    async fn submit__cancelled_action_returns_to_idle() {
        // given
        let (chain, controller) = connected(SimulatedConfig::default()).await;
        chain.pause_mining();
        let mut phase = controller.subscribe_phase();

        // when
        {
            let submit = controller.submit(Action::Claim);
            tokio::pin!(submit);
            tokio::select! {
                _ = &mut submit => panic!("claim confirmed while mining is paused"),
                _ = phase.wait_for(|p| *p == Phase::AwaitingConfirmation) => {}
            }
        }

        // then
        assert_eq!(controller.phase(), Phase::Idle);
        chain.resume_mining();
        let record = controller.submit(Action::Claim).await.unwrap();
        assert_eq!(record.status(), TxStatus::Confirmed);
    }
}

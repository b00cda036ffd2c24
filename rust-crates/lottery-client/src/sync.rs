use crate::{
    activity::{
        ACTIVITY_CAPACITY,
        ActivityEntry,
        describe_event,
    },
    chain::{
        ChainClient,
        EventFilter,
        EventRecord,
        ReadCall,
    },
    error::Result,
    state::{
        ClientState,
        RecentResult,
        Session,
        UserChainState,
    },
};
use chrono::Utc;
use ethers::types::{
    Address,
    U256,
};
use lottery_abi::{
    EventKind,
    LotteryEvent,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct SyncSettings {
    pub global_interval: Duration,
    pub user_interval: Duration,
    pub recent_interval: Duration,
    pub recent_window_blocks: u64,
    pub recent_results: usize,
    pub history_window_blocks: u64,
    pub history_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            global_interval: Duration::from_secs(5),
            user_interval: Duration::from_secs(3),
            recent_interval: Duration::from_secs(30),
            recent_window_blocks: 5_000,
            recent_results: 4,
            history_window_blocks: 100_000,
            history_limit: ACTIVITY_CAPACITY,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RefreshOutcome {
    Applied,
    Partial {
        failed: Vec<&'static str>,
    },
    Failed,
    Stale,
    Skipped,
}

#[derive(Debug)]
pub enum SyncCommand {
    RefreshNow,
    RefreshUser,
    RefreshRecent,
    Shutdown,
}

struct Inner<C> {
    chain: Arc<C>,
    state: watch::Sender<ClientState>,
    settings: SyncSettings,
}

pub struct Synchronizer<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Synchronizer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn keep_ok<T>(
    field: &'static str,
    result: Result<T>,
    failed: &mut Vec<&'static str>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(?err, field, "global refresh read failed");
            failed.push(field);
            None
        }
    }
}

impl<C: ChainClient> Synchronizer<C> {
    pub fn new(chain: Arc<C>, settings: SyncSettings) -> Self {
        let (state, _) = watch::channel(ClientState::default());
        Self {
            inner: Arc::new(Inner {
                chain,
                state,
                settings,
            }),
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.inner.chain
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ClientState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session
    }

    fn epoch(&self) -> u64 {
        self.inner.state.borrow().epoch
    }

    pub fn connect(&self, address: Address) -> Session {
        let mut session = Session { address, epoch: 0 };
        self.inner.state.send_modify(|state| {
            state.epoch += 1;
            session.epoch = state.epoch;
            state.session = Some(session);
            state.user = None;
            state.network_ok = None;
        });
        info!(account = ?address, epoch = session.epoch, "session opened");
        session
    }

    pub fn disconnect(&self) {
        self.inner.state.send_modify(|state| {
            state.epoch += 1;
            state.session = None;
            state.user = None;
            state.network_ok = None;
        });
        info!("session closed");
    }

    async fn read_u256(&self, read: ReadCall) -> Result<U256> {
        self.inner.chain.call(read).await?.into_u256()
    }

    async fn read_u64(&self, read: ReadCall) -> Result<u64> {
        self.inner.chain.call(read).await?.into_u64()
    }

    async fn read_u32(&self, read: ReadCall) -> Result<u32> {
        self.inner.chain.call(read).await?.into_u32()
    }

    async fn read_bool(&self, read: ReadCall) -> Result<bool> {
        self.inner.chain.call(read).await?.into_bool()
    }

    async fn read_address(&self, read: ReadCall) -> Result<Address> {
        self.inner.chain.call(read).await?.into_address()
    }

    pub async fn refresh_global(&self) -> RefreshOutcome {
        let epoch = self.epoch();
        let (prize, fee, ppm, balance, owner, block) = tokio::join!(
            self.read_u256(ReadCall::PrizeAmount),
            self.read_u256(ReadCall::EntryFee),
            self.read_u32(ReadCall::WinChancePpm),
            self.read_u256(ReadCall::ContractBalance),
            self.read_address(ReadCall::Owner),
            self.inner.chain.block_number(),
        );

        let mut failed = Vec::new();
        let prize = keep_ok("prizeWei", prize, &mut failed);
        let fee = keep_ok("entryFeeWei", fee, &mut failed);
        let ppm = keep_ok("winChancePpm", ppm, &mut failed);
        let balance = keep_ok("contractBalance", balance, &mut failed);
        let owner = keep_ok("owner", owner, &mut failed);
        let block = keep_ok("blockNumber", block, &mut failed);
        if failed.len() == 6 {
            return RefreshOutcome::Failed;
        }

        let mut outcome = RefreshOutcome::Stale;
        self.inner.state.send_if_modified(|state| {
            if !state.is_current_epoch(epoch) {
                return false;
            }
            let mut next = state.global.clone();
            next.prize_amount = prize.or(next.prize_amount);
            next.entry_fee = fee.or(next.entry_fee);
            next.win_chance_ppm = ppm.or(next.win_chance_ppm);
            next.contract_balance = balance.or(next.contract_balance);
            next.owner = owner.or(next.owner);
            next.current_block = block.or(next.current_block);
            let changed = next != state.global;
            next.refreshed_at = Some(Utc::now());
            state.global = next;
            outcome = if failed.is_empty() {
                RefreshOutcome::Applied
            } else {
                RefreshOutcome::Partial {
                    failed: failed.clone(),
                }
            };
            changed
        });
        if outcome == RefreshOutcome::Stale {
            debug!(epoch, "discarding global refresh from a closed session");
        }
        outcome
    }

    /// Reads the per-user fields for `address` as one batch. Nothing is applied
    /// unless every read succeeds and `address` is still the connected account.
    pub async fn refresh_user(&self, address: Address) -> RefreshOutcome {
        if address.is_zero() {
            return RefreshOutcome::Skipped;
        }
        let Some(session) = self.session().filter(|s| s.address == address) else {
            debug!(account = ?address, "skipping refresh for an account that is not connected");
            return RefreshOutcome::Skipped;
        };

        let (pending, last, next, can, block) = tokio::join!(
            self.read_u256(ReadCall::PendingPrize(address)),
            self.read_u64(ReadCall::LastPlayedBlock(address)),
            self.read_u64(ReadCall::NextAllowedBlock(address)),
            self.read_bool(ReadCall::CanPlay(address)),
            self.inner.chain.block_number(),
        );
        let user = match (pending, last, next, can) {
            (
                Ok(pending_prize),
                Ok(last_played_block),
                Ok(next_allowed_block),
                Ok(can_play_now),
            ) => UserChainState {
                address,
                pending_prize,
                last_played_block,
                next_allowed_block,
                can_play_now,
            },
            (pending, last, next, can) => {
                let err = pending
                    .err()
                    .or(last.err())
                    .or(next.err())
                    .or(can.err());
                warn!(?err, account = ?address, "user refresh failed");
                return RefreshOutcome::Failed;
            }
        };
        let block = block.ok();

        let mut outcome = RefreshOutcome::Stale;
        self.inner.state.send_if_modified(|state| {
            if !state.is_current_session(address, session.epoch) {
                return false;
            }
            outcome = RefreshOutcome::Applied;
            let mut changed = state.user != Some(user);
            state.user = Some(user);
            if let Some(block) = block
                && state.global.current_block != Some(block)
            {
                state.global.current_block = Some(block);
                changed = true;
            }
            changed
        });
        if outcome == RefreshOutcome::Stale {
            debug!(account = ?address, "discarding user refresh from a closed session");
        }
        outcome
    }

    pub async fn refresh_current_user(&self) -> RefreshOutcome {
        match self.session() {
            Some(session) => self.refresh_user(session.address).await,
            None => RefreshOutcome::Skipped,
        }
    }

    async fn events_in_window(
        &self,
        filter: EventFilter,
        window_blocks: u64,
    ) -> Result<Vec<EventRecord>> {
        let head = self.inner.chain.block_number().await?;
        let from = head.saturating_sub(window_blocks);
        let mut records = self.inner.chain.query_events(filter, from, head).await?;
        records.sort_by_key(|r| (r.block_number, r.log_index));
        Ok(records)
    }

    pub async fn refresh_recent(&self) -> RefreshOutcome {
        let epoch = self.epoch();
        let settings = &self.inner.settings;
        let records = match self
            .events_in_window(
                EventFilter::all(EventKind::Result),
                settings.recent_window_blocks,
            )
            .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(?err, "recent results query failed");
                return RefreshOutcome::Failed;
            }
        };
        let results: Vec<RecentResult> = records
            .into_iter()
            .rev()
            .filter_map(|record| match record.event {
                LotteryEvent::Result {
                    player,
                    won,
                    prize_amount,
                } => Some(RecentResult {
                    player,
                    won,
                    prize_amount,
                    tx_hash: record.tx_hash,
                    block_number: record.block_number,
                }),
                _ => None,
            })
            .take(settings.recent_results)
            .collect();

        let mut outcome = RefreshOutcome::Stale;
        self.inner.state.send_if_modified(|state| {
            if !state.is_current_epoch(epoch) {
                return false;
            }
            outcome = RefreshOutcome::Applied;
            let changed = state.recent_results != results;
            state.recent_results = results;
            changed
        });
        outcome
    }

    pub async fn load_account_history(
        &self,
        session: Session,
    ) -> Option<Vec<ActivityEntry>> {
        let window = self.inner.settings.history_window_blocks;
        let account = session.address;
        let (results, paid, pending) = tokio::join!(
            self.events_in_window(EventFilter::for_account(EventKind::Result, account), window),
            self.events_in_window(
                EventFilter::for_account(EventKind::PrizePaid, account),
                window
            ),
            self.events_in_window(
                EventFilter::for_account(EventKind::PrizePending, account),
                window
            ),
        );

        let mut loaded_any = false;
        let mut records = Vec::new();
        for (kind, result) in [
            (EventKind::Result, results),
            (EventKind::PrizePaid, paid),
            (EventKind::PrizePending, pending),
        ] {
            match result {
                Ok(mut found) => {
                    loaded_any = true;
                    records.append(&mut found);
                }
                Err(err) => warn!(?err, ?kind, "history query failed"),
            }
        }
        if !loaded_any {
            return None;
        }
        if !self
            .inner
            .state
            .borrow()
            .is_current_session(account, session.epoch)
        {
            debug!(account = ?account, "discarding history for a closed session");
            return None;
        }

        records.sort_by(|a, b| {
            (b.block_number, b.log_index).cmp(&(a.block_number, a.log_index))
        });
        Some(
            records
                .into_iter()
                .filter_map(|record| {
                    describe_event(&record.event)
                        .map(|text| ActivityEntry::for_tx(text, record.tx_hash))
                })
                .take(self.inner.settings.history_limit)
                .collect(),
        )
    }

    pub async fn check_network(&self, session: Session, expected: u64) -> bool {
        let chain = &self.inner.chain;
        let ok = match chain.chain_id().await {
            Ok(id) if id == expected => true,
            Ok(id) => {
                warn!(chain_id = id, expected, "wrong network, requesting a switch");
                match chain.switch_chain(expected).await {
                    Ok(()) => matches!(chain.chain_id().await, Ok(id) if id == expected),
                    Err(err) => {
                        warn!(?err, "network switch failed");
                        false
                    }
                }
            }
            Err(err) => {
                warn!(?err, "chain id lookup failed");
                false
            }
        };
        self.inner.state.send_if_modified(|state| {
            if !state.is_current_session(session.address, session.epoch) {
                return false;
            }
            let changed = state.network_ok != Some(ok);
            state.network_ok = Some(ok);
            changed
        });
        ok
    }

    pub fn start(&self) -> SyncHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(sync_worker(self.clone(), rx));
        SyncHandle {
            commands,
            task: Some(task),
        }
    }
}

pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn refresh_now(&self) {
        let _ = self.commands.send(SyncCommand::RefreshNow);
    }

    pub fn refresh_user_now(&self) {
        let _ = self.commands.send(SyncCommand::RefreshUser);
    }

    pub fn refresh_recent_now(&self) {
        let _ = self.commands.send(SyncCommand::RefreshRecent);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.commands.send(SyncCommand::Shutdown);
        task.abort();
        debug!("sync worker stopped");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn sync_worker<C: ChainClient>(
    sync: Synchronizer<C>,
    mut commands: mpsc::UnboundedReceiver<SyncCommand>,
) {
    let settings = sync.settings().clone();
    let mut global_ticker = ticker(settings.global_interval);
    let mut user_ticker = ticker(settings.user_interval);
    let mut recent_ticker = ticker(settings.recent_interval);

    loop {
        tokio::select! {
            _ = global_ticker.tick() => {
                sync.refresh_global().await;
            }
            _ = user_ticker.tick() => {
                sync.refresh_current_user().await;
            }
            _ = recent_ticker.tick() => {
                sync.refresh_recent().await;
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    SyncCommand::RefreshNow => {
                        tokio::join!(sync.refresh_global(), sync.refresh_current_user());
                    }
                    SyncCommand::RefreshUser => {
                        sync.refresh_current_user().await;
                    }
                    SyncCommand::RefreshRecent => {
                        sync.refresh_recent().await;
                    }
                    SyncCommand::Shutdown => break,
                }
            }
        }
    }
}

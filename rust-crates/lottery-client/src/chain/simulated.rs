use crate::{
    chain::{
        ChainClient,
        ChainValue,
        EventFilter,
        EventRecord,
        ReadCall,
        Receipt,
        TxHandle,
        WriteCall,
    },
    codec::{
        MAX_PPM,
        RawWide,
    },
    error::{
        ClientError,
        Result,
    },
};
use ethers::types::{
    Address,
    H256,
    U256,
};
use lottery_abi::{
    LotteryEvent,
    encode_log,
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time,
};
use tracing::debug;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum WideEncoding {
    #[default]
    Native,
    Decimal,
    Limbs,
}

#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub owner: Address,
    pub prize: U256,
    pub entry_fee: U256,
    pub win_chance_ppm: u32,
    pub balance: U256,
    pub chain_id: u64,
    pub seed: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            owner: Address::from_low_u64_be(0x0f),
            prize: U256::exp10(14),
            entry_fee: U256::zero(),
            win_chance_ppm: 10_000,
            balance: U256::exp10(16),
            chain_id: SEPOLIA_CHAIN_ID,
            seed: 7,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Player {
    last_played: Option<u64>,
    pending: U256,
}

impl Player {
    fn next_allowed(&self) -> u64 {
        self.last_played.map_or(0, |block| block + 1)
    }
}

#[derive(Clone, Debug)]
struct Submitted {
    from: Address,
    call: WriteCall,
    value: U256,
    drop_logs: bool,
}

#[derive(Debug, Default)]
struct Faults {
    failing_reads: HashMap<&'static str, usize>,
    reject_next_send: bool,
    fail_next_send: Option<String>,
    drop_next_logs: bool,
    failing_event_queries: usize,
    refuse_switch: bool,
}

struct SimState {
    block: u64,
    chain_id: u64,
    owner: Address,
    prize: U256,
    entry_fee: U256,
    win_chance_ppm: u32,
    balance: U256,
    players: HashMap<Address, Player>,
    signer: Option<Address>,
    next_tx: u64,
    submitted: HashMap<H256, Submitted>,
    receipts: HashMap<H256, (Receipt, Option<String>)>,
    events: Vec<EventRecord>,
    rng: StdRng,
    encoding: WideEncoding,
    faults: Faults,
    sent: Vec<(WriteCall, U256)>,
}

impl SimState {
    fn wide(&self, value: U256) -> ChainValue {
        let raw = match self.encoding {
            WideEncoding::Native => RawWide::Native(value),
            WideEncoding::Decimal => RawWide::Text(value.to_string()),
            WideEncoding::Limbs => RawWide::limbs(value),
        };
        ChainValue::Uint(raw)
    }

    fn player(&self, address: Address) -> Player {
        self.players.get(&address).copied().unwrap_or_default()
    }

    fn read(&self, read: ReadCall) -> ChainValue {
        match read {
            ReadCall::PrizeAmount => self.wide(self.prize),
            ReadCall::EntryFee => self.wide(self.entry_fee),
            ReadCall::WinChancePpm => self.wide(U256::from(self.win_chance_ppm)),
            ReadCall::Owner => ChainValue::Address(self.owner),
            ReadCall::ContractBalance => self.wide(self.balance),
            ReadCall::LastPlayedBlock(user) => {
                self.wide(U256::from(self.player(user).last_played.unwrap_or_default()))
            }
            ReadCall::PendingPrize(user) => self.wide(self.player(user).pending),
            ReadCall::CanPlay(user) => {
                ChainValue::Bool(self.block >= self.player(user).next_allowed())
            }
            ReadCall::NextAllowedBlock(user) => {
                self.wide(U256::from(self.player(user).next_allowed()))
            }
        }
    }

    fn execute(
        &mut self,
        from: Address,
        call: &WriteCall,
        value: U256,
    ) -> std::result::Result<Vec<LotteryEvent>, String> {
        if !value.is_zero() && !call.is_payable() {
            return Err("function is not payable".to_owned());
        }
        match call {
            WriteCall::Play { salt } => {
                if value != self.entry_fee {
                    return Err("incorrect entry fee".to_owned());
                }
                let mut player = self.player(from);
                if self.block < player.next_allowed() {
                    return Err("already played in this block".to_owned());
                }
                self.balance += value;
                player.last_played = Some(self.block);
                let roll = (self.rng.random::<u64>() ^ salt.low_u64()) % u64::from(MAX_PPM);
                let won = roll < u64::from(self.win_chance_ppm);
                let mut events = vec![LotteryEvent::Result {
                    player: from,
                    won,
                    prize_amount: if won { self.prize } else { U256::zero() },
                }];
                if won && self.balance >= self.prize {
                    self.balance -= self.prize;
                    events.push(LotteryEvent::PrizePaid {
                        to: from,
                        amount: self.prize,
                    });
                } else if won {
                    player.pending += self.prize;
                    events.push(LotteryEvent::PrizePending {
                        to: from,
                        amount: self.prize,
                    });
                }
                self.players.insert(from, player);
                Ok(events)
            }
            WriteCall::Claim => {
                let mut player = self.player(from);
                if player.pending.is_zero() {
                    return Ok(Vec::new());
                }
                if self.balance < player.pending {
                    return Err("insufficient contract balance".to_owned());
                }
                let amount = player.pending;
                self.balance -= amount;
                player.pending = U256::zero();
                self.players.insert(from, player);
                Ok(vec![LotteryEvent::PrizePaid { to: from, amount }])
            }
            WriteCall::Fund => {
                self.balance += value;
                Ok(Vec::new())
            }
            WriteCall::SetParams {
                prize,
                entry_fee,
                win_chance_ppm,
            } => {
                if from != self.owner {
                    return Err("caller is not the owner".to_owned());
                }
                if *win_chance_ppm > MAX_PPM {
                    return Err("win chance above 1000000 ppm".to_owned());
                }
                self.prize = *prize;
                self.entry_fee = *entry_fee;
                self.win_chance_ppm = *win_chance_ppm;
                Ok(vec![LotteryEvent::ParamsUpdated {
                    prize: *prize,
                    entry_fee: *entry_fee,
                    win_chance_ppm: *win_chance_ppm,
                }])
            }
            WriteCall::Withdraw { amount } => {
                if from != self.owner {
                    return Err("caller is not the owner".to_owned());
                }
                if *amount > self.balance {
                    return Err("insufficient contract balance".to_owned());
                }
                self.balance -= *amount;
                Ok(Vec::new())
            }
        }
    }

    fn mine(&mut self, hash: H256) -> Option<(Receipt, Option<String>)> {
        if let Some(done) = self.receipts.get(&hash) {
            return Some(done.clone());
        }
        let submitted = self.submitted.remove(&hash)?;
        self.block += 1;
        let block = self.block;
        let outcome = self.execute(submitted.from, &submitted.call, submitted.value);
        let (receipt, reason) = match outcome {
            Ok(events) => {
                let mut logs = Vec::new();
                for (index, event) in events.into_iter().enumerate() {
                    if let Some(log) = encode_log(&event) {
                        logs.push(log);
                    }
                    self.events.push(EventRecord {
                        event,
                        block_number: block,
                        log_index: index as u64,
                        tx_hash: hash,
                    });
                }
                if submitted.drop_logs {
                    logs.clear();
                }
                let receipt = Receipt {
                    tx_hash: hash,
                    block_number: block,
                    success: true,
                    logs,
                };
                (receipt, None)
            }
            Err(reason) => {
                let receipt = Receipt {
                    tx_hash: hash,
                    block_number: block,
                    success: false,
                    logs: Vec::new(),
                };
                (receipt, Some(reason))
            }
        };
        debug!(?hash, block, success = receipt.success, "simulated transaction mined");
        self.receipts.insert(hash, (receipt.clone(), reason.clone()));
        Some((receipt, reason))
    }
}

#[derive(Clone, Copy, Debug)]
struct Gate {
    open: bool,
    blocked: usize,
}

pub struct SimulatedChain {
    state: Mutex<SimState>,
    mining: watch::Sender<bool>,
    reads: watch::Sender<Gate>,
    sends: watch::Sender<Gate>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl SimulatedChain {
    pub fn new(config: SimulatedConfig) -> Self {
        let state = SimState {
            block: 1,
            chain_id: config.chain_id,
            owner: config.owner,
            prize: config.prize,
            entry_fee: config.entry_fee,
            win_chance_ppm: config.win_chance_ppm,
            balance: config.balance,
            players: HashMap::new(),
            signer: None,
            next_tx: 0,
            submitted: HashMap::new(),
            receipts: HashMap::new(),
            events: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
            encoding: WideEncoding::default(),
            faults: Faults::default(),
            sent: Vec::new(),
        };
        let (mining, _) = watch::channel(true);
        let (reads, _) = watch::channel(Gate::OPEN);
        let (sends, _) = watch::channel(Gate::OPEN);
        Self {
            state: Mutex::new(state),
            mining,
            reads,
            sends,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn block(&self) -> u64 {
        self.lock().block
    }

    pub fn mine_block(&self) -> u64 {
        let mut state = self.lock();
        state.block += 1;
        state.block
    }

    pub fn owner(&self) -> Address {
        self.lock().owner
    }

    pub fn balance(&self) -> U256 {
        self.lock().balance
    }

    pub fn set_balance(&self, balance: U256) {
        self.lock().balance = balance;
    }

    pub fn pending_prize_of(&self, account: Address) -> U256 {
        self.lock().player(account).pending
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
    }

    pub fn set_wide_encoding(&self, encoding: WideEncoding) {
        self.lock().encoding = encoding;
    }

    pub fn fail_reads(&self, function: &'static str, times: usize) {
        self.lock().faults.failing_reads.insert(function, times);
    }

    pub fn fail_event_queries(&self, times: usize) {
        self.lock().faults.failing_event_queries = times;
    }

    pub fn reject_next_send(&self) {
        self.lock().faults.reject_next_send = true;
    }

    pub fn fail_next_send(&self, message: impl Into<String>) {
        self.lock().faults.fail_next_send = Some(message.into());
    }

    /// Strips the logs from the next transaction's receipt. The events stay
    /// queryable.
    pub fn drop_logs_of_next_tx(&self) {
        self.lock().faults.drop_next_logs = true;
    }

    pub fn refuse_chain_switch(&self) {
        self.lock().faults.refuse_switch = true;
    }

    pub fn pause_mining(&self) {
        self.mining.send_replace(false);
    }

    pub fn resume_mining(&self) {
        self.mining.send_replace(true);
    }

    pub fn hold_reads(&self) {
        self.reads.send_modify(|gate| gate.open = false);
    }

    pub fn release_reads(&self) {
        self.reads.send_modify(|gate| gate.open = true);
    }

    pub async fn wait_for_blocked_reads(&self, count: usize) {
        let mut rx = self.reads.subscribe();
        let _ = rx.wait_for(|gate| gate.blocked >= count).await;
    }

    pub fn hold_sends(&self) {
        self.sends.send_modify(|gate| gate.open = false);
    }

    pub fn release_sends(&self) {
        self.sends.send_modify(|gate| gate.open = true);
    }

    pub async fn wait_for_blocked_sends(&self, count: usize) {
        let mut rx = self.sends.subscribe();
        let _ = rx.wait_for(|gate| gate.blocked >= count).await;
    }

    pub fn sent(&self) -> Vec<(WriteCall, U256)> {
        self.lock().sent.clone()
    }

    pub fn last_sent_value(&self) -> Option<U256> {
        self.lock().sent.last().map(|(_, value)| *value)
    }

    pub fn spawn_block_producer(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                chain.mine_block();
            }
        })
    }
}

impl Gate {
    const OPEN: Self = Self {
        open: true,
        blocked: 0,
    };
}

async fn pass_gate(gate: &watch::Sender<Gate>) {
    let mut rx = gate.subscribe();
    let open = rx.borrow_and_update().open;
    if open {
        return;
    }
    gate.send_modify(|gate| gate.blocked += 1);
    let _ = rx.wait_for(|gate| gate.open).await;
    gate.send_modify(|gate| gate.blocked = gate.blocked.saturating_sub(1));
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

impl ChainClient for SimulatedChain {
    type Signer = Address;

    async fn call(&self, read: ReadCall) -> Result<ChainValue> {
        pass_gate(&self.reads).await;
        let mut state = self.lock();
        if let Some(counter) = state.faults.failing_reads.get_mut(read.function_name())
            && take_fault(counter)
        {
            return Err(ClientError::Rpc(format!(
                "{} failed: connection reset",
                read.function_name()
            )));
        }
        Ok(state.read(read))
    }

    async fn block_number(&self) -> Result<u64> {
        pass_gate(&self.reads).await;
        Ok(self.lock().block)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.lock().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let mut state = self.lock();
        if state.faults.refuse_switch {
            return Err(ClientError::UserRejected);
        }
        state.chain_id = chain_id;
        Ok(())
    }

    fn attach_signer(&self, signer: Address) -> Address {
        self.lock().signer = Some(signer);
        signer
    }

    fn detach_signer(&self) {
        self.lock().signer = None;
    }

    fn account(&self) -> Option<Address> {
        self.lock().signer
    }

    async fn send(&self, call: WriteCall, value: U256) -> Result<TxHandle> {
        pass_gate(&self.sends).await;
        let mut state = self.lock();
        let from = state.signer.ok_or(ClientError::NoSigner)?;
        if std::mem::take(&mut state.faults.reject_next_send) {
            return Err(ClientError::UserRejected);
        }
        if let Some(message) = state.faults.fail_next_send.take() {
            return Err(ClientError::Rpc(message));
        }
        state.next_tx += 1;
        let hash = H256::from_low_u64_be(state.next_tx);
        let drop_logs = std::mem::take(&mut state.faults.drop_next_logs);
        state.sent.push((call.clone(), value));
        state.submitted.insert(
            hash,
            Submitted {
                from,
                call,
                value,
                drop_logs,
            },
        );
        Ok(TxHandle { hash })
    }

    async fn wait_for_confirmation(&self, tx: TxHandle) -> Result<Receipt> {
        let mut mining = self.mining.subscribe();
        let _ = mining.wait_for(|open| *open).await;
        let mined = self.lock().mine(tx.hash);
        match mined {
            Some((receipt, None)) => Ok(receipt),
            Some((_, Some(reason))) => Err(ClientError::TransactionReverted(reason)),
            None => Err(ClientError::Rpc(format!("unknown transaction {:#x}", tx.hash))),
        }
    }

    async fn get_receipt(&self, tx: TxHandle) -> Result<Option<Receipt>> {
        Ok(self
            .lock()
            .receipts
            .get(&tx.hash)
            .map(|(receipt, _)| receipt.clone()))
    }

    async fn query_events(
        &self,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>> {
        let mut state = self.lock();
        if take_fault(&mut state.faults.failing_event_queries) {
            return Err(ClientError::Rpc("eth_getLogs failed: timeout".to_owned()));
        }
        Ok(state
            .events
            .iter()
            .filter(|record| record.event.kind() == Some(filter.kind))
            .filter(|record| {
                filter
                    .account
                    .is_none_or(|account| record.event.account() == Some(account))
            })
            .filter(|record| (from_block..=to_block).contains(&record.block_number))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use lottery_abi::{
        EventKind,
        decode_log,
    };

    fn alice() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    async fn play(chain: &SimulatedChain, value: U256) -> Result<Receipt> {
        let tx = chain
            .send(
                WriteCall::Play {
                    salt: U256::from(3u64),
                },
                value,
            )
            .await?;
        chain.wait_for_confirmation(tx).await
    }

    #[tokio::test]
    async fn play__certain_win_pays_out_immediately() {
        // given
        let chain = SimulatedChain::new(SimulatedConfig {
            win_chance_ppm: MAX_PPM,
            ..SimulatedConfig::default()
        });
        chain.attach_signer(alice());
        let before = chain.balance();

        // when
        let receipt = play(&chain, U256::zero()).await.unwrap();

        // then
        let events: Vec<_> = receipt.logs.iter().map(decode_log).collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LotteryEvent::Result { won: true, .. }));
        assert!(matches!(events[1], LotteryEvent::PrizePaid { .. }));
        assert_eq!(chain.balance(), before - U256::exp10(14));
        assert!(chain.pending_prize_of(alice()).is_zero());
    }

    #[tokio::test]
    async fn play__underfunded_win_becomes_pending() {
        // given
        let chain = SimulatedChain::new(SimulatedConfig {
            win_chance_ppm: MAX_PPM,
            balance: U256::zero(),
            ..SimulatedConfig::default()
        });
        chain.attach_signer(alice());

        // when
        let receipt = play(&chain, U256::zero()).await.unwrap();

        // then
        let last = decode_log(receipt.logs.last().unwrap());
        assert_eq!(last.kind(), Some(EventKind::PrizePending));
        assert_eq!(chain.pending_prize_of(alice()), U256::exp10(14));
    }

    #[tokio::test]
    async fn play__wrong_fee_reverts_without_state_change() {
        // given
        let chain = SimulatedChain::new(SimulatedConfig {
            entry_fee: U256::from(5u64),
            ..SimulatedConfig::default()
        });
        chain.attach_signer(alice());
        let before = chain.balance();

        // when
        let result = play(&chain, U256::from(4u64)).await;

        // then
        assert_eq!(
            result,
            Err(ClientError::TransactionReverted("incorrect entry fee".to_owned()))
        );
        assert_eq!(chain.balance(), before);
    }

    #[tokio::test]
    async fn call__can_play_flips_after_a_new_block() {
        // given
        let chain = SimulatedChain::default();
        chain.attach_signer(alice());
        play(&chain, U256::zero()).await.unwrap();

        // when
        let blocked = chain.call(ReadCall::CanPlay(alice())).await.unwrap();
        chain.mine_block();
        let allowed = chain.call(ReadCall::CanPlay(alice())).await.unwrap();

        // then
        assert_eq!(blocked, ChainValue::Bool(false));
        assert_eq!(allowed, ChainValue::Bool(true));
    }

    #[tokio::test]
    async fn call__serves_configured_wide_encoding() {
        // given
        let chain = SimulatedChain::default();
        chain.set_wide_encoding(WideEncoding::Limbs);

        // when
        let prize = chain.call(ReadCall::PrizeAmount).await.unwrap();

        // then
        assert_eq!(
            prize,
            ChainValue::Uint(RawWide::Limbs {
                low: 100_000_000_000_000,
                high: 0
            })
        );
    }

    #[tokio::test]
    async fn call__injected_failure_is_consumed() {
        // given
        let chain = SimulatedChain::default();
        chain.fail_reads("prizeWei", 1);

        // when
        let first = chain.call(ReadCall::PrizeAmount).await;
        let second = chain.call(ReadCall::PrizeAmount).await;

        // then
        assert!(matches!(first, Err(ClientError::Rpc(_))));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn send__without_signer_fails() {
        let chain = SimulatedChain::default();
        let result = chain.send(WriteCall::Claim, U256::zero()).await;
        assert_eq!(result, Err(ClientError::NoSigner));
    }

    #[tokio::test]
    async fn set_params__reverts_for_non_owner() {
        // given
        let chain = SimulatedChain::default();
        chain.attach_signer(alice());
        let call = WriteCall::SetParams {
            prize: U256::one(),
            entry_fee: U256::one(),
            win_chance_ppm: 1,
        };

        // when
        let tx = chain.send(call, U256::zero()).await.unwrap();
        let result = chain.wait_for_confirmation(tx).await;

        // then
        assert!(matches!(result, Err(ClientError::TransactionReverted(_))));
        let receipt = chain.get_receipt(tx).await.unwrap().unwrap();
        assert!(!receipt.success);
    }

    #[tokio::test]
    async fn query_events__filters_by_account_and_range() {
        // given
        let chain = SimulatedChain::default();
        chain.attach_signer(alice());
        play(&chain, U256::zero()).await.unwrap();
        let bob = Address::from_low_u64_be(0xb0b);
        chain.attach_signer(bob);
        play(&chain, U256::zero()).await.unwrap();
        let head = chain.block();

        // when
        let all = chain
            .query_events(EventFilter::all(EventKind::Result), 0, head)
            .await
            .unwrap();
        let mine = chain
            .query_events(EventFilter::for_account(EventKind::Result, alice()), 0, head)
            .await
            .unwrap();
        let latest_only = chain
            .query_events(EventFilter::all(EventKind::Result), head, head)
            .await
            .unwrap();

        // then
        assert_eq!(all.len(), 2);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].event.account(), Some(alice()));
        assert_eq!(latest_only.len(), 1);
        assert_eq!(latest_only[0].event.account(), Some(bob));
    }
}

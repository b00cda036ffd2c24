use chrono::{
    DateTime,
    Utc,
};
use ethers::types::{
    Address,
    H256,
    U256,
};

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct ChainParameters {
    pub prize_amount: U256,
    pub entry_fee: U256,
    pub win_chance_ppm: u32,
    pub contract_balance: U256,
}

#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct GlobalState {
    pub prize_amount: Option<U256>,
    pub entry_fee: Option<U256>,
    pub win_chance_ppm: Option<u32>,
    pub contract_balance: Option<U256>,
    pub owner: Option<Address>,
    pub current_block: Option<u64>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl GlobalState {
    pub fn parameters(&self) -> Option<ChainParameters> {
        Some(ChainParameters {
            prize_amount: self.prize_amount?,
            entry_fee: self.entry_fee?,
            win_chance_ppm: self.win_chance_ppm?,
            contract_balance: self.contract_balance?,
        })
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct UserChainState {
    pub address: Address,
    pub pending_prize: U256,
    pub last_played_block: u64,
    pub next_allowed_block: u64,
    pub can_play_now: bool,
}

/// A connected wallet. The epoch changes on every connect and disconnect.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Session {
    pub address: Address,
    pub epoch: u64,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RecentResult {
    pub player: Address,
    pub won: bool,
    pub prize_amount: U256,
    pub tx_hash: H256,
    pub block_number: u64,
}

#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct ClientState {
    pub global: GlobalState,
    pub session: Option<Session>,
    pub user: Option<UserChainState>,
    pub recent_results: Vec<RecentResult>,
    pub network_ok: Option<bool>,
    pub epoch: u64,
}

impl ClientState {
    pub fn parameters(&self) -> Option<ChainParameters> {
        self.global.parameters()
    }

    pub fn connected_address(&self) -> Option<Address> {
        self.session.map(|session| session.address)
    }

    pub fn is_owner(&self) -> bool {
        match (self.global.owner, self.connected_address()) {
            (Some(owner), Some(account)) => owner == account,
            _ => false,
        }
    }

    pub fn is_current_epoch(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub fn is_current_session(&self, address: Address, epoch: u64) -> bool {
        self.session
            .is_some_and(|session| session.address == address && session.epoch == epoch)
    }
}

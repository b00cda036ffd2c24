use crate::{
    codec::RawWide,
    error::{
        ClientError,
        Result,
    },
};
use ethers::{
    abi::RawLog,
    types::{
        Address,
        H256,
        U256,
    },
};
use lottery_abi::{
    EventKind,
    LotteryEvent,
};

pub mod evm;
pub mod simulated;

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum ReadCall {
    PrizeAmount,
    EntryFee,
    WinChancePpm,
    Owner,
    ContractBalance,
    LastPlayedBlock(Address),
    PendingPrize(Address),
    CanPlay(Address),
    NextAllowedBlock(Address),
}

impl ReadCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ReadCall::PrizeAmount => "prizeWei",
            ReadCall::EntryFee => "entryFeeWei",
            ReadCall::WinChancePpm => "winChancePpm",
            ReadCall::Owner => "owner",
            ReadCall::ContractBalance => "contractBalance",
            ReadCall::LastPlayedBlock(_) => "get_user_last_played_block",
            ReadCall::PendingPrize(_) => "get_pending_prizes",
            ReadCall::CanPlay(_) => "get_can_play",
            ReadCall::NextAllowedBlock(_) => "get_next_allowed_block",
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ChainValue {
    Uint(RawWide),
    Bool(bool),
    Address(Address),
}

impl ChainValue {
    pub fn into_u256(self) -> Result<U256> {
        match self {
            ChainValue::Uint(raw) => raw.normalize().map_err(ClientError::rpc),
            other => Err(unexpected("uint", &other)),
        }
    }

    pub fn into_u64(self) -> Result<u64> {
        let value = self.into_u256()?;
        if value > U256::from(u64::MAX) {
            return Err(ClientError::Rpc(format!("{value} does not fit in u64")));
        }
        Ok(value.as_u64())
    }

    pub fn into_u32(self) -> Result<u32> {
        let value = self.into_u256()?;
        if value > U256::from(u32::MAX) {
            return Err(ClientError::Rpc(format!("{value} does not fit in u32")));
        }
        Ok(value.as_u32())
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            ChainValue::Bool(flag) => Ok(flag),
            other => Err(unexpected("bool", &other)),
        }
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            ChainValue::Address(address) => Ok(address),
            other => Err(unexpected("address", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &ChainValue) -> ClientError {
    ClientError::Rpc(format!("expected {expected}, node returned {got:?}"))
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum WriteCall {
    Play {
        salt: U256,
    },
    Claim,
    Fund,
    SetParams {
        prize: U256,
        entry_fee: U256,
        win_chance_ppm: u32,
    },
    Withdraw {
        amount: U256,
    },
}

impl WriteCall {
    pub fn is_payable(&self) -> bool {
        matches!(self, WriteCall::Play { .. } | WriteCall::Fund)
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct TxHandle {
    pub hash: H256,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<RawLog>,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct EventFilter {
    pub kind: EventKind,
    pub account: Option<Address>,
}

impl EventFilter {
    pub fn all(kind: EventKind) -> Self {
        Self {
            kind,
            account: None,
        }
    }

    pub fn for_account(kind: EventKind, account: Address) -> Self {
        Self {
            kind,
            account: Some(account),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct EventRecord {
    pub event: LotteryEvent,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

pub trait ChainClient: Send + Sync + 'static {
    type Signer: Clone + Send + Sync + 'static;

    fn call(&self, read: ReadCall) -> impl Future<Output = Result<ChainValue>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    fn switch_chain(&self, chain_id: u64) -> impl Future<Output = Result<()>> + Send;

    fn attach_signer(&self, signer: Self::Signer) -> Address;

    fn detach_signer(&self);

    fn account(&self) -> Option<Address>;

    fn send(
        &self,
        call: WriteCall,
        value: U256,
    ) -> impl Future<Output = Result<TxHandle>> + Send;

    /// Resolves once the transaction is mined. A reverted transaction resolves
    /// to [`ClientError::TransactionReverted`].
    fn wait_for_confirmation(
        &self,
        tx: TxHandle,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn get_receipt(
        &self,
        tx: TxHandle,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    fn query_events(
        &self,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<EventRecord>>> + Send;
}

pub fn is_rejection_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("action_rejected")
        || lower.contains("code: 4001")
        || lower.contains("\"code\":4001")
}

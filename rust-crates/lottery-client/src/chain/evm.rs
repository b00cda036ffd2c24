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
        is_rejection_message,
    },
    error::{
        ClientError,
        Result,
    },
};
use ethers::{
    abi::{
        Detokenize,
        RawLog,
    },
    contract::{
        ContractCall,
        ContractError,
        EthError,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        JsonRpcError,
        Middleware,
        PendingTransaction,
        Provider,
        RpcError,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        BlockId,
        BlockNumber,
        Filter,
        H256,
        Log,
        TransactionReceipt,
        TransactionRequest,
        U64,
        U256,
    },
};
use lottery_abi::{
    Lottery,
    decode_log,
};
use serde_json::json;
use std::{
    sync::{
        Arc,
        PoisonError,
        RwLock,
    },
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct EvmChainClient {
    provider: Provider<Http>,
    contract: Address,
    chain_id: u64,
    reader: Lottery<Provider<Http>>,
    writer: RwLock<Option<(Address, Lottery<SignerClient>)>>,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str, contract: Address, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ClientError::Rpc(format!("invalid RPC URL {rpc_url}: {e}")))?
            .interval(CONFIRMATION_POLL_INTERVAL);
        let reader = Lottery::new(contract, Arc::new(provider.clone()));
        Ok(Self {
            provider,
            contract,
            chain_id,
            reader,
            writer: RwLock::new(None),
        })
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    fn writer(&self) -> Result<Lottery<SignerClient>> {
        self.writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, writer)| writer.clone())
            .ok_or(ClientError::NoSigner)
    }

    fn to_receipt(&self, receipt: TransactionReceipt) -> Receipt {
        let logs = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.contract)
            .map(raw_log)
            .collect();
        Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            success: receipt.status != Some(U64::zero()),
            logs,
        }
    }

    // Replays the call on the state before its block to recover the reason.
    async fn replay_revert_reason(&self, hash: H256, block: u64) -> Option<String> {
        let tx = match self.provider.get_transaction(hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return None,
            Err(err) => {
                warn!(?err, ?hash, "could not fetch reverted transaction");
                return None;
            }
        };
        let mut request = TransactionRequest::new()
            .from(tx.from)
            .data(tx.input.clone())
            .value(tx.value);
        if let Some(to) = tx.to {
            request = request.to(to);
        }
        let at = BlockId::Number(BlockNumber::Number(U64::from(block.saturating_sub(1))));
        let err = self.provider.call(&request.into(), Some(at)).await.err()?;
        err.as_error_response().and_then(revert_reason)
    }
}

fn revert_reason(err: &JsonRpcError) -> Option<String> {
    if let Some(reason) = err
        .as_revert_data()
        .and_then(|data| String::decode_with_selector(&data))
    {
        return Some(reason);
    }
    err.message
        .strip_prefix("execution reverted: ")
        .map(str::to_owned)
}

fn raw_log(log: &Log) -> RawLog {
    RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    }
}

fn read_error<M: Middleware>(read: ReadCall, err: ContractError<M>) -> ClientError {
    ClientError::Rpc(format!("{} failed: {err}", read.function_name()))
}

fn write_error<M: Middleware>(err: ContractError<M>) -> ClientError {
    if let Some(reason) = err.decode_revert::<String>() {
        return ClientError::TransactionReverted(reason);
    }
    if err.is_revert() {
        return ClientError::TransactionReverted("execution reverted".to_owned());
    }
    let message = err.to_string();
    if is_rejection_message(&message) {
        ClientError::UserRejected
    } else {
        ClientError::Rpc(message)
    }
}

async fn submit<D: Detokenize>(
    call: ContractCall<SignerClient, D>,
    value: U256,
) -> Result<TxHandle> {
    let call = call.value(value);
    let pending = call.send().await.map_err(write_error)?;
    Ok(TxHandle {
        hash: pending.tx_hash(),
    })
}

impl ChainClient for EvmChainClient {
    type Signer = LocalWallet;

    async fn call(&self, read: ReadCall) -> Result<ChainValue> {
        let c = &self.reader;
        let value = match read {
            ReadCall::PrizeAmount => ChainValue::Uint(
                c.prize_wei().call().await.map_err(|e| read_error(read, e))?.into(),
            ),
            ReadCall::EntryFee => ChainValue::Uint(
                c.entry_fee_wei()
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?
                    .into(),
            ),
            ReadCall::WinChancePpm => {
                let ppm = c
                    .win_chance_ppm()
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?;
                ChainValue::Uint(U256::from(ppm).into())
            }
            ReadCall::Owner => ChainValue::Address(
                c.owner().call().await.map_err(|e| read_error(read, e))?,
            ),
            ReadCall::ContractBalance => ChainValue::Uint(
                c.contract_balance()
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?
                    .into(),
            ),
            ReadCall::LastPlayedBlock(user) => {
                let block = c
                    .get_user_last_played_block(user)
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?;
                ChainValue::Uint(U256::from(block).into())
            }
            ReadCall::PendingPrize(user) => ChainValue::Uint(
                c.get_pending_prizes(user)
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?
                    .into(),
            ),
            ReadCall::CanPlay(user) => ChainValue::Bool(
                c.get_can_play(user)
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?,
            ),
            ReadCall::NextAllowedBlock(user) => {
                let block = c
                    .get_next_allowed_block(user)
                    .call()
                    .await
                    .map_err(|e| read_error(read, e))?;
                ChainValue::Uint(U256::from(block).into())
            }
        };
        Ok(value)
    }

    async fn block_number(&self) -> Result<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(ClientError::rpc)?;
        Ok(number.as_u64())
    }

    async fn chain_id(&self) -> Result<u64> {
        let id = self.provider.get_chainid().await.map_err(ClientError::rpc)?;
        Ok(id.as_u64())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let params = [json!({ "chainId": format!("{chain_id:#x}") })];
        self.provider
            .request::<_, serde_json::Value>("wallet_switchEthereumChain", params)
            .await
            .map(|_| ())
            .map_err(|err| {
                let message = err.to_string();
                if is_rejection_message(&message) {
                    ClientError::UserRejected
                } else {
                    ClientError::Rpc(message)
                }
            })
    }

    fn attach_signer(&self, signer: LocalWallet) -> Address {
        let wallet = signer.with_chain_id(self.chain_id);
        let address = wallet.address();
        let client = SignerMiddleware::new(self.provider.clone(), wallet);
        let writer = Lottery::new(self.contract, Arc::new(client));
        *self.writer.write().unwrap_or_else(PoisonError::into_inner) =
            Some((address, writer));
        info!(account = ?address, "signer attached");
        address
    }

    fn detach_signer(&self) {
        self.writer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("signer detached");
    }

    fn account(&self) -> Option<Address> {
        self.writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(address, _)| *address)
    }

    async fn send(&self, call: WriteCall, value: U256) -> Result<TxHandle> {
        let writer = self.writer()?;
        match call {
            WriteCall::Play { salt } => submit(writer.play(salt), value).await,
            WriteCall::Claim => submit(writer.claim(), value).await,
            WriteCall::Fund => submit(writer.fund(), value).await,
            WriteCall::SetParams {
                prize,
                entry_fee,
                win_chance_ppm,
            } => {
                submit(writer.set_params(prize, entry_fee, win_chance_ppm), value).await
            }
            WriteCall::Withdraw { amount } => {
                submit(writer.owner_withdraw(amount), value).await
            }
        }
    }

    async fn wait_for_confirmation(&self, tx: TxHandle) -> Result<Receipt> {
        let pending = PendingTransaction::new(tx.hash, &self.provider)
            .interval(CONFIRMATION_POLL_INTERVAL);
        let receipt = pending
            .await
            .map_err(ClientError::rpc)?
            .ok_or_else(|| {
                ClientError::TransactionReverted(format!(
                    "transaction {:#x} was dropped from the mempool",
                    tx.hash
                ))
            })?;
        let receipt = self.to_receipt(receipt);
        if !receipt.success {
            let reason = match self
                .replay_revert_reason(tx.hash, receipt.block_number)
                .await
            {
                Some(reason) => reason,
                None => format!(
                    "transaction {:#x} reverted in block {}",
                    tx.hash, receipt.block_number
                ),
            };
            return Err(ClientError::TransactionReverted(reason));
        }
        Ok(receipt)
    }

    async fn get_receipt(&self, tx: TxHandle) -> Result<Option<Receipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx.hash)
            .await
            .map_err(ClientError::rpc)?;
        Ok(receipt.map(|r| self.to_receipt(r)))
    }

    async fn query_events(
        &self,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>> {
        let mut query = Filter::new()
            .address(self.contract)
            .topic0(filter.kind.topic())
            .from_block(from_block)
            .to_block(to_block);
        if let Some(account) = filter.account
            && filter.kind.is_player_indexed()
        {
            query = query.topic1(H256::from(account));
        }
        let logs = self
            .provider
            .get_logs(&query)
            .await
            .map_err(ClientError::rpc)?;
        Ok(logs
            .iter()
            .map(|log| EventRecord {
                event: decode_log(&raw_log(log)),
                block_number: log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                log_index: log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
                tx_hash: log.transaction_hash.unwrap_or_default(),
            })
            .collect())
    }
}

use crate::{
    chain::{
        ChainClient,
        simulated::{
            SimulatedChain,
            SimulatedConfig,
        },
    },
    controller::TransactionController,
    state::Session,
    sync::{
        SyncSettings,
        Synchronizer,
    },
};
use ethers::types::{
    Address,
    U256,
};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

pub fn alice_address() -> Address {
    Address::from_low_u64_be(0xa11ce)
}

pub fn bob_address() -> Address {
    Address::from_low_u64_be(0xb0b)
}

pub fn eth(whole: u64) -> U256 {
    U256::exp10(18) * U256::from(whole)
}

pub struct TestContext {
    chain: Arc<SimulatedChain>,
    controller: Arc<TransactionController<SimulatedChain>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SimulatedConfig::default())
    }

    pub fn with_config(config: SimulatedConfig) -> Self {
        Self::with_settings(config, SyncSettings::default())
    }

    pub fn with_settings(config: SimulatedConfig, settings: SyncSettings) -> Self {
        let chain = Arc::new(SimulatedChain::new(config));
        let sync = Synchronizer::new(Arc::clone(&chain), settings);
        let controller = Arc::new(TransactionController::new(sync));
        Self { chain, controller }
    }

    pub fn chain(&self) -> &Arc<SimulatedChain> {
        &self.chain
    }

    pub fn sync(&self) -> &Synchronizer<SimulatedChain> {
        self.controller.synchronizer()
    }

    pub fn controller(&self) -> &Arc<TransactionController<SimulatedChain>> {
        &self.controller
    }

    pub fn owner_address(&self) -> Address {
        self.chain.owner()
    }

    pub async fn connect_as(&self, account: Address) -> Session {
        self.chain.attach_signer(account);
        let session = self.sync().connect(account);
        self.sync().refresh_global().await;
        self.sync().refresh_user(account).await;
        session
    }

    pub async fn connect_alice(&self) -> Session {
        self.connect_as(alice_address()).await
    }

    pub async fn connect_owner(&self) -> Session {
        self.connect_as(self.owner_address()).await
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

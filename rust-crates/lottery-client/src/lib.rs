pub mod activity;
pub mod chain;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod state;
pub mod sync;
pub mod wallets;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use activity::{
    ActivityEntry,
    ActivityLog,
};
pub use chain::{
    ChainClient,
    evm::EvmChainClient,
    simulated::SimulatedChain,
};
pub use controller::{
    Action,
    Phase,
    TransactionController,
    TransactionRecord,
    TxStatus,
};
pub use error::ClientError;
pub use state::ClientState;
pub use sync::{
    SyncHandle,
    SyncSettings,
    Synchronizer,
};

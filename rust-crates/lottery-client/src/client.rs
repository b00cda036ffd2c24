use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::signers::LocalWallet;
use lottery_client::{
    Action,
    ChainClient,
    ClientError,
    ClientState,
    EvmChainClient,
    SimulatedChain,
    SyncHandle,
    SyncSettings,
    Synchronizer,
    TransactionController,
    TransactionRecord,
    TxStatus,
    chain::simulated::SimulatedConfig,
    codec::short_address,
    config::{
        AppConfig,
        NetworkTarget,
        WalletConfig,
    },
    controller::TxKind,
    wallets,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;
const SIMULATED_BLOCK_TIME: Duration = Duration::from_secs(12);

struct ActionReport {
    kind: TxKind,
    result: lottery_client::error::Result<TransactionRecord>,
}

struct App<C: ChainClient> {
    controller: Arc<TransactionController<C>>,
    signer: C::Signer,
    chain_id: u64,
    network_label: String,
    worker: Option<SyncHandle>,
    status: String,
    errors: Vec<String>,
    last_can_play: Option<bool>,
    reports: mpsc::UnboundedSender<ActionReport>,
}

impl<C: ChainClient> App<C> {
    fn sync(&self) -> &Synchronizer<C> {
        self.controller.synchronizer()
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.errors.clear();
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    fn connect(&mut self) {
        let sync = self.sync().clone();
        let address = sync.chain().attach_signer(self.signer.clone());
        let session = sync.connect(address);
        self.controller.clear_activity();
        self.last_can_play = None;
        self.worker = Some(sync.start());
        self.set_status(format!("Connected {}", short_address(address)));

        let controller = Arc::clone(&self.controller);
        let chain_id = self.chain_id;
        tokio::spawn(async move {
            let sync = controller.synchronizer();
            if !sync.check_network(session, chain_id).await {
                warn!(chain_id, "not on the expected network");
            }
            if let Some(history) = sync.load_account_history(session).await {
                info!(entries = history.len(), "account history loaded");
                controller.seed_activity(history);
            }
        });
    }

    fn disconnect(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.sync().disconnect();
        self.sync().chain().detach_signer();
        self.controller.clear_activity();
        self.last_can_play = None;
        self.set_status("Disconnected");
    }

    fn toggle_connection(&mut self) {
        if self.sync().session().is_some() {
            self.disconnect();
        } else {
            self.connect();
        }
    }

    fn refresh(&mut self) {
        match &self.worker {
            Some(worker) => {
                worker.refresh_now();
                worker.refresh_recent_now();
                self.set_status("Refreshing…");
            }
            None => self.set_status("Connect a wallet first (d)"),
        }
    }

    fn spawn_action(&mut self, action: Action) {
        let kind = action.kind();
        if !self.controller.phase().is_busy() {
            self.set_status(format!("Submitting {kind}…"));
        }
        let controller = Arc::clone(&self.controller);
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let result = controller.submit(action).await;
            let _ = reports.send(ActionReport { kind, result });
        });
    }

    fn on_report(&mut self, report: ActionReport) {
        match report.result {
            Ok(record) if record.status() == TxStatus::Failed => {
                self.push_errors(vec![format!(
                    "{} failed: {}",
                    report.kind,
                    record.message()
                )]);
            }
            Ok(record) => self.set_status(record.message()),
            Err(ClientError::Busy) => {
                self.push_errors(vec!["Another transaction is still in flight".to_owned()]);
            }
            Err(err) => self.push_errors(vec![format!(
                "{} not sent: {}",
                report.kind,
                err.short_message()
            )]),
        }
    }

    fn on_state(&mut self, state: &ClientState) {
        let Some(can_play) = state.user.map(|user| user.can_play_now) else {
            return;
        };
        if self.last_can_play == Some(false) && can_play {
            self.set_status("New block detected! You can play now.");
        }
        self.last_can_play = Some(can_play);
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let AppConfig {
        network, wallet, sync, ..
    } = config;
    match network {
        NetworkTarget::Rpc {
            url,
            contract,
            chain_id,
        } => {
            let signer = load_signer(&wallet)?;
            let chain = EvmChainClient::new(&url, contract, chain_id)
                .wrap_err("Failed to set up the RPC client")?;
            info!(%url, ?contract, chain_id, "using JSON-RPC chain");
            let label = format!("chain {chain_id}");
            run_with_chain(Arc::new(chain), signer, chain_id, label, sync).await
        }
        NetworkTarget::Simulated { chain_id } => {
            let chain = Arc::new(SimulatedChain::new(SimulatedConfig {
                chain_id,
                ..SimulatedConfig::default()
            }));
            let producer = chain.spawn_block_producer(SIMULATED_BLOCK_TIME);
            let signer = chain.owner();
            info!(chain_id, "using simulated chain");
            let label = format!("simulated ({chain_id})");
            let res = run_with_chain(chain, signer, chain_id, label, sync).await;
            producer.abort();
            res
        }
    }
}

fn load_signer(wallet: &WalletConfig) -> Result<LocalWallet> {
    match wallet {
        WalletConfig::Keystore { name, dir } => {
            let descriptor = wallets::find_wallet(dir, name)?;
            wallets::unlock_wallet(&descriptor)
        }
        WalletConfig::PrivateKey(secret) => wallets::wallet_from_hex(secret.expose()),
        WalletConfig::Simulated => {
            Err(eyre!("The simulated wallet can only sign on the simulated chain"))
        }
    }
}

async fn run_with_chain<C: ChainClient>(
    chain: Arc<C>,
    signer: C::Signer,
    chain_id: u64,
    network_label: String,
    settings: SyncSettings,
) -> Result<()> {
    let sync = Synchronizer::new(chain, settings);
    let controller = Arc::new(TransactionController::new(sync));
    let (reports, mut report_rx) = mpsc::unbounded_channel();
    let mut app = App {
        controller,
        signer,
        chain_id,
        network_label,
        worker: None,
        status: String::new(),
        errors: Vec::new(),
        last_can_play: None,
        reports,
    };

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();
    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut app, &mut report_rx, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<C: ChainClient>(
    app: &mut App<C>,
    reports: &mut mpsc::UnboundedReceiver<ActionReport>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    let mut state_rx = app.sync().subscribe();
    let mut activity_rx = app.controller.subscribe_activity();
    let mut phase_rx = app.controller.subscribe_phase();
    app.connect();

    loop {
        let state = state_rx.borrow_and_update().clone();
        let activity = activity_rx.borrow_and_update().clone();
        let phase = *phase_rx.borrow_and_update();
        app.on_state(&state);
        let view = ui::View {
            state: &state,
            activity: &activity,
            phase,
            status: &app.status,
            errors: &app.errors,
            network: &app.network_label,
        };
        ui::draw(ui_state, &view).wrap_err("draw failed")?;

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    warn!("state channel closed");
                    break;
                }
            }
            _ = activity_rx.changed() => {}
            _ = phase_rx.changed() => {}
            Some(report) = reports.recv() => app.on_report(report),
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Play { salt } => {
                        app.spawn_action(Action::Play { salt: Some(salt) })
                    }
                    ui::UserEvent::Claim => app.spawn_action(Action::Claim),
                    ui::UserEvent::Fund(amount) => app.spawn_action(Action::Fund { amount }),
                    ui::UserEvent::SetParams {
                        prize,
                        entry_fee,
                        win_chance_percent,
                    } => app.spawn_action(Action::SetParams {
                        prize,
                        entry_fee,
                        win_chance_percent,
                    }),
                    ui::UserEvent::Withdraw(amount) => {
                        app.spawn_action(Action::Withdraw { amount })
                    }
                    ui::UserEvent::Refresh => app.refresh(),
                    ui::UserEvent::ToggleConnection => app.toggle_connection(),
                    ui::UserEvent::Redraw => {}
                }
            }
        }
    }
    info!("leaving app loop");
    Ok(())
}

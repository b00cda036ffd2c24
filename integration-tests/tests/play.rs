#![allow(non_snake_case)]

use ethers::types::U256;
use lottery_client::{
    Action,
    TxStatus,
    chain::{
        ChainClient,
        WriteCall,
        simulated::SimulatedConfig,
    },
    codec::MAX_PPM,
    controller::DecodedOutcome,
    test_helpers::{
        TestContext,
        alice_address,
    },
};
use proptest::prelude::*;
use tokio::runtime::Builder;

const PRIZE: u64 = 100_000_000_000_000;

fn certain_win() -> SimulatedConfig {
    SimulatedConfig {
        entry_fee: U256::zero(),
        win_chance_ppm: MAX_PPM,
        ..SimulatedConfig::default()
    }
}

#[tokio::test]
async fn play__certain_win_pays_out_and_leaves_nothing_pending() {
    let ctx = TestContext::with_config(certain_win());
    ctx.connect_alice().await;

    // given
    let before = ctx.sync().snapshot().user.unwrap();
    assert!(before.pending_prize.is_zero());

    // when
    let record = ctx
        .controller()
        .submit(Action::Play { salt: None })
        .await
        .unwrap();

    // then
    assert_eq!(record.status(), TxStatus::Confirmed);
    assert_eq!(
        record.outcome(),
        Some(DecodedOutcome {
            won: true,
            prize_paid: U256::from(PRIZE),
        })
    );
    let after = ctx.sync().snapshot().user.unwrap();
    assert!(after.pending_prize.is_zero());
    assert!(ctx.chain().pending_prize_of(alice_address()).is_zero());
    let texts: Vec<_> = ctx
        .controller()
        .activity()
        .iter()
        .map(|e| e.text.clone())
        .collect();
    assert!(texts.contains(&"PrizePaid → 0.000100 ETH".to_owned()));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 8, .. ProptestConfig::default() })]
    #[test]
    fn play__zero_chance_never_wins(seed in any::<u64>()) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            _play__zero_chance_never_wins(seed).await.unwrap()
        });
    }
}

async fn _play__zero_chance_never_wins(seed: u64) -> Result<(), TestCaseError> {
    let ctx = TestContext::with_config(SimulatedConfig {
        win_chance_ppm: 0,
        seed,
        ..SimulatedConfig::default()
    });
    ctx.connect_alice().await;

    for _ in 0..100 {
        // when
        let record = ctx
            .controller()
            .submit(Action::Play { salt: None })
            .await
            .unwrap();

        // then
        prop_assert_eq!(record.status(), TxStatus::Confirmed);
        prop_assert_eq!(record.outcome().map(|o| o.won), Some(false));
        prop_assert_eq!(record.message(), "No luck this time.");
    }
    Ok(())
}

#[tokio::test]
async fn play__attaches_the_synchronized_entry_fee() {
    let fee = U256::exp10(15);
    let ctx = TestContext::with_config(SimulatedConfig {
        entry_fee: fee,
        ..SimulatedConfig::default()
    });
    ctx.connect_alice().await;

    // when
    let record = ctx
        .controller()
        .submit(Action::Play { salt: None })
        .await
        .unwrap();

    // then
    assert_eq!(record.status(), TxStatus::Confirmed);
    assert_eq!(ctx.chain().last_sent_value(), Some(fee));
}

#[tokio::test]
async fn play__fee_changed_after_sync_reverts_and_is_reported() {
    let ctx = TestContext::new();
    ctx.connect_alice().await;

    // given
    let chain = ctx.chain();
    chain.attach_signer(ctx.owner_address());
    let tx = chain
        .send(
            WriteCall::SetParams {
                prize: U256::exp10(14),
                entry_fee: U256::exp10(15),
                win_chance_ppm: 10_000,
            },
            U256::zero(),
        )
        .await
        .unwrap();
    chain.wait_for_confirmation(tx).await.unwrap();
    chain.attach_signer(alice_address());

    // when
    let record = ctx
        .controller()
        .submit(Action::Play { salt: None })
        .await
        .unwrap();

    // then
    assert_eq!(chain.last_sent_value(), Some(U256::zero()));
    assert_eq!(record.status(), TxStatus::Failed);
    assert_eq!(record.message(), "incorrect entry fee");
    assert_eq!(
        ctx.sync().snapshot().global.entry_fee,
        Some(U256::exp10(15))
    );
}

#[tokio::test]
async fn play__without_result_log_reports_unknown_outcome() {
    let ctx = TestContext::with_config(certain_win());
    ctx.connect_alice().await;

    // given
    ctx.chain().drop_logs_of_next_tx();

    // when
    let record = ctx
        .controller()
        .submit(Action::Play { salt: None })
        .await
        .unwrap();

    // then
    assert_eq!(record.status(), TxStatus::Confirmed);
    assert_eq!(record.outcome(), None);
    assert_eq!(record.message(), "Finished. (No Result event decoded)");
}

#[tokio::test]
async fn play__same_block_is_refused_by_the_contract() {
    let ctx = TestContext::new();
    ctx.connect_alice().await;

    // given
    ctx.controller()
        .submit(Action::Play { salt: None })
        .await
        .unwrap();
    let user = ctx.sync().snapshot().user.unwrap();

    // then
    assert!(!user.can_play_now);
    assert_eq!(user.next_allowed_block, ctx.chain().block() + 1);

    // when
    ctx.chain().mine_block();
    ctx.sync().refresh_user(alice_address()).await;

    // then
    assert!(ctx.sync().snapshot().user.unwrap().can_play_now);
}

//! # 债务账本演示程序入口
//!
//! 模拟共识引擎驱动状态机：第一个区块由银行向客户发行50单位债务，第二个区块客户还款25单位。
//! 用法：`debtchain [config.json]`，未指定配置时使用临时数据库。

use anyhow::{Context, Result};
use std::env;

use debtchain::app::{Application, DebtLedgerApp, TxResponse};
use debtchain::config::AppConfig;
use debtchain::envelope::{Command, CommandKind};
use debtchain::wallet::Wallet;

fn print_response(label: &str, response: &TxResponse) {
    println!(
        "  {} -> code: {}, info: {}, data: {}",
        label,
        response.code,
        response.info,
        String::from_utf8_lossy(&response.data)
    );
}

fn run_block(app: &mut DebtLedgerApp, height: i64, cmd: &Command) -> Result<TxResponse> {
    let raw = cmd.encode();
    print_response("CheckTx", &app.check_tx(&raw));

    app.begin_block();
    let response = app.deliver_tx(&raw);
    print_response("DeliverTx", &response);
    app.end_block(height);
    let commit = app.commit().context("commit failed")?;
    println!("  Commit -> app hash: {}", hex::encode(&commit.data));
    Ok(response)
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => AppConfig::load_from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => AppConfig::temporary(),
    };
    let mut app = DebtLedgerApp::new(config).context("opening ledger")?;

    let bank = Wallet::new();
    let client = Wallet::new();
    println!("银行身份: {}", hex::encode(bank.identity()));
    println!("客户地址: {}", hex::encode(&client.key_hash));

    println!("\n区块1: 发行债务");
    let debt_tx = bank.construct_debt_transaction(&client.key_hash, 50);
    let issue = Command::wrap(CommandKind::IssueDebt, &hex::encode(&client.key_hash), &debt_tx);
    println!("  broadcast body: {}", issue.broadcast_body("anything"));
    run_block(&mut app, 1, &issue)?;

    println!("\n区块2: 还款");
    let repayment_tx = client.construct_repayment_transaction(&bank.identity(), &bank.key_hash, 25);
    let repay = Command::wrap(CommandKind::Repayment, &hex::encode(&bank.key_hash), &repayment_tx);
    println!("  broadcast body: {}", repay.broadcast_body("anything"));
    run_block(&mut app, 2, &repay)?;

    println!(
        "\n系统信用总额: {}, 系统债务总额: {}",
        app.aggregate_credits()?,
        app.aggregate_debt()?
    );
    Ok(())
}

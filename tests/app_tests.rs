use debtchain::app::{Application, BlockPhase, DebtLedgerApp, RequestQuery, TxResponse};
use debtchain::auth::AcceptAll;
use debtchain::config::{AppConfig, UtxoKeying};
use debtchain::digest::{legacy_height_digest, DigestMode};
use debtchain::envelope::{Command, CommandKind};
use debtchain::error::{
    CODE_DUPLICATE, CODE_ENCODING_ERROR, CODE_INVALID_TRANSACTION, CODE_NOT_FOUND, CODE_OK,
    CODE_OVERPAYMENT, CODE_UNKNOWN_COMMAND,
};
use debtchain::transaction::{Transaction, TxInput, TxOutput, UnlockingScript};

fn issuance(creditor: &[u8], debtor: &[u8], amount: u64) -> Transaction {
    Transaction::new(
        vec![TxInput::debt_attestation(creditor, UnlockingScript::default())],
        vec![TxOutput::new(debtor, amount)],
    )
}

fn repayment(debt_key: &[u8], creditor: &[u8], amount: u64) -> Transaction {
    Transaction::new(
        vec![TxInput {
            reference: debt_key.to_vec(),
            output_index: 0,
            unlocking_script: UnlockingScript::default(),
        }],
        vec![TxOutput::new(creditor, amount)],
    )
}

fn issue_cmd(tx: &Transaction) -> Vec<u8> {
    Command::wrap(CommandKind::IssueDebt, "debtor", tx).encode()
}

fn repay_cmd(tx: &Transaction) -> Vec<u8> {
    Command::wrap(CommandKind::Repayment, "creditor", tx).encode()
}

fn raw_cmd(command: &str, transaction: &str) -> Vec<u8> {
    Command {
        command: command.to_string(),
        address: "someone".to_string(),
        transaction: transaction.to_string(),
    }
    .encode()
}

fn temp_app() -> DebtLedgerApp {
    DebtLedgerApp::new(AppConfig::temporary()).unwrap()
}

fn strict_app() -> DebtLedgerApp {
    let config = AppConfig {
        strict_responses: true,
        ..AppConfig::temporary()
    };
    DebtLedgerApp::new(config).unwrap()
}

// 辅助函数：执行完整的区块生命周期，返回每笔交易的响应和提交摘要
fn run_block(app: &mut DebtLedgerApp, height: i64, txs: &[Vec<u8>]) -> (Vec<TxResponse>, Vec<u8>) {
    app.begin_block();
    let responses = txs.iter().map(|raw| app.deliver_tx(raw)).collect();
    app.end_block(height);
    let commit = app.commit().unwrap();
    (responses, commit.data)
}

#[test]
fn test_issue_then_repay_scenario() {
    let mut app = temp_app();

    // 场景1：B向A发行50
    let debt_tx = issuance(b"B", b"A", 50);
    let (responses, _) = run_block(&mut app, 1, &[issue_cmd(&debt_tx)]);
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[0].info, "Total System Credits: 50");

    let stores = app.stores();
    assert_eq!(stores.ledger.len(), 1);
    assert_eq!(stores.utxo.len(), 1);
    assert_eq!(
        TxOutput::deserialize(&stores.utxo.get(b"A").unwrap().unwrap()).unwrap(),
        TxOutput::new(b"A", 50)
    );
    let record = Transaction::deserialize(&stores.debt.get(b"B").unwrap().unwrap()).unwrap();
    assert_eq!(record.outputs, vec![TxOutput::new(b"A", 50)]);
    assert_eq!(app.aggregate_credits().unwrap(), 50);
    assert_eq!(app.aggregate_debt().unwrap(), 50);

    // 场景2：还款25
    let repay_tx = repayment(b"B", b"B", 25);
    let (responses, _) = run_block(&mut app, 2, &[repay_cmd(&repay_tx)]);
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[0].info, "Total System Debt: 25");

    let new_record = Transaction::new(Vec::new(), vec![TxOutput::new(b"A", 25)]);
    assert_eq!(responses[0].data, hex::encode(new_record.hash()).into_bytes());
    let stores = app.stores();
    assert_eq!(stores.debt.get(b"B").unwrap(), None);
    assert_eq!(
        stores.debt.get(&new_record.hash()).unwrap(),
        Some(new_record.serialize())
    );
    assert_eq!(app.aggregate_debt().unwrap(), 25);
    assert_eq!(app.aggregate_credits().unwrap(), 50);
}

#[test]
fn test_malformed_transaction_base64_is_rejected() {
    let mut app = temp_app();
    let raw = raw_cmd("IssueDebt", "%%%not base64%%%");
    let before = app.stores().snapshot().unwrap();

    // 场景3：CheckTx和DeliverTx都返回非零的解析失败
    let checked = app.check_tx(&raw);
    assert_eq!(checked.code, CODE_ENCODING_ERROR);
    assert!(checked.info.to_lowercase().contains("could not parse"));

    app.begin_block();
    let delivered = app.deliver_tx(&raw);
    assert_eq!(delivered.code, CODE_ENCODING_ERROR);
    assert!(delivered.info.to_lowercase().contains("could not parse"));
    assert_eq!(app.pending_writes(), 0);
    app.end_block(1);
    app.commit().unwrap();

    assert_eq!(app.stores().snapshot().unwrap(), before);
}

#[test]
fn test_malformed_envelope_is_rejected() {
    let mut app = temp_app();
    let inputs: [&[u8]; 3] = [b"not json at all", b"", b"{\"Address\":\"x\"}"];
    for raw in inputs {
        let checked = app.check_tx(raw);
        assert_eq!(checked.code, CODE_ENCODING_ERROR);
        assert_eq!(checked.info, "Could not parse command JSON");
        assert_eq!(app.deliver_tx(raw).code, CODE_ENCODING_ERROR);
    }
    assert_eq!(app.pending_writes(), 0);
}

#[test]
fn test_unrecognized_command_is_accepted_without_effect() {
    // 场景4：旧行为接受未知命令，但不产生任何修改
    let mut app = temp_app();
    let tx = issuance(b"B", b"A", 50);
    let raw = Command::wrap(CommandKind::Unrecognized("Transfer".to_string()), "x", &tx).encode();

    let checked = app.check_tx(&raw);
    assert_eq!(checked.code, CODE_OK);
    assert_eq!(checked.info, "unrecognized command");

    let (responses, _) = run_block(&mut app, 1, &[raw]);
    assert_eq!(responses[0].code, CODE_OK);
    assert!(app.stores().ledger.is_empty());
    assert!(app.stores().utxo.is_empty());
    assert!(app.stores().debt.is_empty());
}

#[test]
fn test_strict_mode_rejects_unrecognized_command() {
    let mut app = strict_app();
    let tx = issuance(b"B", b"A", 50);
    let raw = Command::wrap(CommandKind::Unrecognized("Transfer".to_string()), "x", &tx).encode();

    // CheckTx与DeliverTx都返回未知命令
    assert_eq!(app.check_tx(&raw).code, CODE_UNKNOWN_COMMAND);
    app.begin_block();
    assert_eq!(app.deliver_tx(&raw).code, CODE_UNKNOWN_COMMAND);
}

#[test]
fn test_check_tx_never_mutates_stores() {
    let mut app = temp_app();
    run_block(&mut app, 1, &[issue_cmd(&issuance(b"B", b"A", 50))]);
    let before = app.stores().snapshot().unwrap();

    // 各类合法与非法输入
    let inputs = vec![
        issue_cmd(&issuance(b"C", b"D", 70)),
        repay_cmd(&repayment(b"B", b"B", 10)),
        repay_cmd(&repayment(b"missing", b"B", 10)),
        raw_cmd("IssueDebt", "@@@"),
        raw_cmd("Transfer", ""),
        b"garbage".to_vec(),
    ];
    for raw in &inputs {
        app.check_tx(raw);
    }

    // 验证已提交状态未变

    assert_eq!(app.stores().snapshot().unwrap(), before);
    assert_eq!(app.pending_writes(), 0);
}

#[test]
fn test_check_tx_reports_issuance_total() {
    let app = temp_app();
    let tx = Transaction::new(
        vec![
            TxInput::debt_attestation(b"B", UnlockingScript::default()),
            TxInput::debt_attestation(b"B", UnlockingScript::default()),
        ],
        vec![TxOutput::new(b"A", 30), TxOutput::new(b"C", 12)],
    );
    // 发行：info为输出总额
    let response = app.check_tx(&issue_cmd(&tx));
    assert_eq!(response.code, CODE_OK);
    assert_eq!(response.info, "42");
    assert_eq!(response.data, b"Valid IssueDebt Cmd".to_vec());

    // 还款：只确认可解码
    let response = app.check_tx(&repay_cmd(&repayment(b"B", b"B", 1)));
    assert_eq!(response.data, b"Valid Repayment Cmd".to_vec());
}

#[test]
fn test_ill_formed_issuance_is_rejected() {
    let mut app = temp_app();
    let mut tx = issuance(b"B", b"A", 50);
    tx.outputs.push(TxOutput::new(b"C", 5));

    // CheckTx只做解码，DeliverTx才做结构检查
    assert_eq!(app.check_tx(&issue_cmd(&tx)).code, CODE_OK);
    let (responses, _) = run_block(&mut app, 1, &[issue_cmd(&tx)]);
    assert_eq!(responses[0].code, CODE_INVALID_TRANSACTION);
    assert!(app.stores().ledger.is_empty());
}

#[test]
fn test_strict_mode_requires_sentinel_input() {
    let mut app = strict_app();

    // 没有哨兵输入的发行
    let tx = repayment(b"B", b"A", 50);
    let (responses, _) = run_block(&mut app, 1, &[issue_cmd(&tx)]);
    assert_eq!(responses[0].code, CODE_INVALID_TRANSACTION);
    assert!(app.stores().debt.is_empty());
}

#[test]
fn test_overpayment_is_rejected_and_balance_kept() {
    let mut app = temp_app();
    run_block(&mut app, 1, &[issue_cmd(&issuance(b"B", b"A", 50))]);
    let before = app.stores().snapshot().unwrap();

    // 还款60超过未偿余额50
    let (responses, _) = run_block(&mut app, 2, &[repay_cmd(&repayment(b"B", b"B", 60))]);
    assert_eq!(responses[0].code, CODE_OVERPAYMENT);
    assert_eq!(app.stores().snapshot().unwrap(), before);
    assert_eq!(app.aggregate_debt().unwrap(), 50);
}

#[test]
fn test_missing_debt_record_keeps_legacy_success_code() {
    let mut app = temp_app();
    let (responses, _) = run_block(&mut app, 1, &[repay_cmd(&repayment(b"nobody", b"B", 5))]);
    assert_eq!(responses[0].code, CODE_OK);
    assert!(responses[0].info.contains("not found"));
    // 失败的还款不会追加到账本
    assert!(app.stores().ledger.is_empty());

    // 严格模式返回未找到
    let mut strict = strict_app();
    let (responses, _) = run_block(&mut strict, 1, &[repay_cmd(&repayment(b"nobody", b"B", 5))]);
    assert_eq!(responses[0].code, CODE_NOT_FOUND);
}

#[test]
fn test_empty_repayment_does_not_panic() {
    let mut app = temp_app();
    let empty = Transaction::new(Vec::new(), Vec::new());
    let (responses, _) = run_block(&mut app, 1, &[repay_cmd(&empty)]);
    assert_eq!(responses[0].code, CODE_INVALID_TRANSACTION);
}

#[test]
fn test_replay_of_issuance_and_repayment() {
    let mut app = temp_app();
    let issue = issue_cmd(&issuance(b"B", b"A", 50));
    let (responses, _) = run_block(&mut app, 1, &[issue.clone(), issue.clone()]);
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[1].code, CODE_DUPLICATE);

    // 跨区块重放同样无效
    let (responses, _) = run_block(&mut app, 2, &[issue]);
    assert_eq!(responses[0].code, CODE_DUPLICATE);
    assert_eq!(app.stores().ledger.len(), 1);
    assert_eq!(app.stores().utxo.len(), 1);
    assert_eq!(app.aggregate_debt().unwrap(), 50);

    // 相同的还款重放两次只扣减一次
    let repay = repay_cmd(&repayment(b"B", b"B", 20));
    let (responses, _) = run_block(&mut app, 3, &[repay.clone(), repay]);
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[1].code, CODE_DUPLICATE);
    assert_eq!(app.aggregate_debt().unwrap(), 30);
}

#[test]
fn test_block_writes_invisible_until_commit() {
    let mut app = temp_app();
    app.begin_block();
    assert_eq!(app.phase(), BlockPhase::BlockOpen);
    let response = app.deliver_tx(&issue_cmd(&issuance(b"B", b"A", 50)));
    assert_eq!(response.code, CODE_OK);

    // 提交前：已提交状态和查询都看不到写入
    assert!(app.stores().ledger.is_empty());
    assert_eq!(app.aggregate_credits().unwrap(), 0);
    let query = app.query(&RequestQuery {
        path: "/credits".to_string(),
        data: Vec::new(),
    });
    assert_eq!(query.value, b"0".to_vec());

    // 同一区块内后续交易可以看到暂存写入
    let response = app.deliver_tx(&repay_cmd(&repayment(b"B", b"B", 20)));
    assert_eq!(response.code, CODE_OK);
    assert_eq!(response.info, "Total System Debt: 30");

    app.end_block(1);
    app.commit().unwrap();
    assert_eq!(app.phase(), BlockPhase::BlockClosed);
    assert_eq!(app.aggregate_credits().unwrap(), 50);
    assert_eq!(app.aggregate_debt().unwrap(), 30);
}

#[test]
fn test_replicas_agree_on_commit_digest() {
    let blocks = vec![
        vec![issue_cmd(&issuance(b"B", b"A", 50)), issue_cmd(&issuance(b"C", b"D", 20))],
        vec![],
        vec![repay_cmd(&repayment(b"B", b"B", 25))],
    ];

    // 两个副本执行相同的区块序列
    let mut first = temp_app();
    let mut second = temp_app();
    for (i, block) in blocks.iter().enumerate() {
        let height = i as i64 + 1;
        let (_, a) = run_block(&mut first, height, block);
        let (_, b) = run_block(&mut second, height, block);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
    assert_eq!(first.stores().snapshot().unwrap(), second.stores().snapshot().unwrap());

    // 交易顺序不同，摘要不同
    let mut reordered = temp_app();
    let swapped = vec![blocks[0][1].clone(), blocks[0][0].clone()];
    let (_, digest) = run_block(&mut reordered, 1, &swapped);
    let mut reference = temp_app();
    let (_, expected) = run_block(&mut reference, 1, &blocks[0]);
    assert_ne!(digest, expected);
}

#[test]
fn test_empty_block_keeps_app_hash() {
    let mut app = temp_app();
    let (_, first) = run_block(&mut app, 1, &[issue_cmd(&issuance(b"B", b"A", 50))]);

    // 空区块不改变应用哈希
    let (_, second) = run_block(&mut app, 2, &[]);
    assert_eq!(first, second);
}

#[test]
fn test_legacy_height_digest() {
    let config = AppConfig {
        commit_digest: DigestMode::LegacyHeight,
        ..AppConfig::temporary()
    };
    let mut app = DebtLedgerApp::new(config).unwrap();
    let (_, digest) = run_block(&mut app, 5, &[issue_cmd(&issuance(b"B", b"A", 50))]);
    assert_eq!(digest, legacy_height_digest(5));
    assert_eq!(digest, vec![10, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(app.height(), 6);

    // 不调用EndBlock时高度按提交次数递增
    app.begin_block();
    let digest = app.commit().unwrap().data;
    assert_eq!(digest, legacy_height_digest(6));
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        data_dir: dir.path().join("ledger"),
        ..AppConfig::default()
    };

    let digest = {
        let mut app = DebtLedgerApp::new(config.clone()).unwrap();
        run_block(&mut app, 1, &[issue_cmd(&issuance(b"B", b"A", 50))]);
        let (_, digest) = run_block(&mut app, 2, &[repay_cmd(&repayment(b"B", b"B", 5))]);
        digest
    };

    // 重新打开后恢复高度、摘要和余额
    let app = DebtLedgerApp::new(config).unwrap();
    let info = app.info();
    assert_eq!(info.last_block_height, 2);
    assert_eq!(info.last_block_app_hash, digest);
    assert_eq!(app.height(), 3);
    assert_eq!(app.aggregate_credits().unwrap(), 50);
    assert_eq!(app.aggregate_debt().unwrap(), 45);
}

#[test]
fn test_query_paths() {
    let mut app = temp_app();
    let tx = issuance(b"B", b"A", 50);
    run_block(&mut app, 1, &[issue_cmd(&tx)]);

    let query = |path: &str, data: Vec<u8>| {
        app.query(&RequestQuery {
            path: path.to_string(),
            data,
        })
    };
    // 逐个路径验证
    assert_eq!(query("", Vec::new()).value, b"empty query path".to_vec());
    assert_eq!(query("test", Vec::new()).value, b"test".to_vec());
    assert_eq!(query("/test", Vec::new()).value, b"test".to_vec());
    assert_eq!(query("credits", Vec::new()).value, b"50".to_vec());
    assert_eq!(query("debt", Vec::new()).value, b"50".to_vec());
    assert_eq!(query("tx", tx.hash()).value, tx.serialize());
    assert_eq!(query("tx", vec![0u8; 32]).code, CODE_NOT_FOUND);
    assert_eq!(
        query("balances", Vec::new()).value,
        b"could not recognize path".to_vec()
    );
}

#[test]
fn test_same_creditor_issuances_conserve_debt() {
    let config = AppConfig {
        utxo_keying: UtxoKeying::Outpoint,
        ..AppConfig::temporary()
    };
    let mut app = DebtLedgerApp::new(config).unwrap();
    assert_eq!(app.config().utxo_keying, UtxoKeying::Outpoint);

    // 同一区块内B两次发行
    let (responses, _) = run_block(
        &mut app,
        1,
        &[
            issue_cmd(&issuance(b"B", b"A", 50)),
            issue_cmd(&issuance(b"B", b"C", 30)),
        ],
    );
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[1].code, CODE_DUPLICATE);
    assert!(responses[1].info.contains("already occupied"));

    // 被拒绝的发行不写入任何存储
    assert_eq!(app.stores().ledger.len(), 1);
    assert_eq!(app.aggregate_credits().unwrap(), 50);
    assert_eq!(app.aggregate_debt().unwrap(), 50);
}

#[test]
fn test_colliding_repayment_is_rejected() {
    let mut app = temp_app();
    run_block(
        &mut app,
        1,
        &[
            issue_cmd(&issuance(b"B", b"A", 50)),
            issue_cmd(&issuance(b"C", b"A", 40)),
        ],
    );
    assert_eq!(app.aggregate_debt().unwrap(), 90);

    // 两次还款后剩余记录相同，第二笔必须失败
    let (responses, _) = run_block(
        &mut app,
        2,
        &[
            repay_cmd(&repayment(b"B", b"B", 25)),
            repay_cmd(&repayment(b"C", b"C", 15)),
        ],
    );
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(responses[1].code, CODE_DUPLICATE);

    // C的记录仍在原键下
    assert!(app.stores().debt.get(b"C").unwrap().is_some());
    assert_eq!(app.stores().debt.len(), 2);
    assert_eq!(app.stores().ledger.len(), 3);
    assert_eq!(app.aggregate_debt().unwrap(), 65);
}

#[test]
fn test_custom_authorizer_replaces_default() {
    let config = AppConfig {
        verify_authorization: true,
        ..AppConfig::temporary()
    };

    // 默认的secp256k1授权拒绝未签名交易
    let strict = DebtLedgerApp::new(config.clone()).unwrap();
    let raw = issue_cmd(&issuance(b"B", b"A", 50));
    assert_eq!(strict.check_tx(&raw).code, CODE_INVALID_TRANSACTION);

    // 替换为全部接受的授权后同一交易通过
    let mut app = DebtLedgerApp::new(config)
        .unwrap()
        .with_authorizer(Box::new(AcceptAll));
    assert!(app.config().verify_authorization);
    assert_eq!(app.check_tx(&raw).code, CODE_OK);
    let (responses, _) = run_block(&mut app, 1, &[raw]);
    assert_eq!(responses[0].code, CODE_OK);
    assert_eq!(app.aggregate_debt().unwrap(), 50);
}

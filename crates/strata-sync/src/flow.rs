//! Submitting a user transaction end to end.
//!
//! Record intent in the ledger, send, wait for finality, then record the
//! outcome. The error goes back to the caller together with its
//! classification so the UI can tell a wallet rejection from a failure.

use std::sync::Arc;

use strata_types::{
    NewTransaction, Receipt, ReceiptStatus, TransactionUpdate, TxRequest, TxStatus,
    DEFAULT_CONFIRMATIONS,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ChainClient, ClientSlot};
use crate::confirm::ConfirmationWaiter;
use crate::error::{classify, ChainError, ErrorClass, SyncError};
use crate::ledger::TransactionLedger;

/// A confirmed submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    /// Ledger entry id.
    pub id: String,
    /// Hash of the last step.
    pub tx_hash: String,
    pub receipt: Receipt,
}

/// A failed submission. The ledger entry `id` has been marked failed in the
/// history of the account it was recorded under.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SubmitError {
    pub id: String,
    pub class: ErrorClass,
    pub source: SyncError,
}

impl SubmitError {
    pub fn is_user_rejected(&self) -> bool {
        self.class == ErrorClass::UserRejected
    }
}

pub struct TransactionFlow<C> {
    slot: ClientSlot<C>,
    waiter: ConfirmationWaiter<C>,
    ledger: Arc<TransactionLedger>,
    confirmations: u64,
}

impl<C: ChainClient> TransactionFlow<C> {
    pub fn new(slot: ClientSlot<C>, ledger: Arc<TransactionLedger>) -> Self {
        Self {
            waiter: ConfirmationWaiter::new(slot.clone()),
            slot,
            ledger,
            confirmations: DEFAULT_CONFIRMATIONS,
        }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub async fn submit(
        &self,
        entry: NewTransaction,
        request: TxRequest,
    ) -> Result<Submitted, SubmitError> {
        self.submit_steps(entry, vec![request]).await
    }

    /// Submit `steps` in order (for example an allowance approval followed
    /// by the swap itself) under a single ledger entry. Each step must be
    /// confirmed before the next is sent.
    pub async fn submit_steps(
        &self,
        mut entry: NewTransaction,
        steps: Vec<TxRequest>,
    ) -> Result<Submitted, SubmitError> {
        entry.status = TxStatus::Pending;
        let kind = entry.kind;
        let (id, owner) = self.ledger.record(entry);

        let mut last_hash = None;
        match self.run_steps(&steps, &mut last_hash).await {
            Ok((tx_hash, receipt)) => {
                self.ledger.update_transaction_for(
                    owner.as_deref(),
                    &id,
                    TransactionUpdate::success(tx_hash.clone()),
                );
                info!(id = %id, kind = ?kind, tx_hash = %tx_hash, "Transaction confirmed");
                Ok(Submitted {
                    id,
                    tx_hash,
                    receipt,
                })
            }
            Err(source) => {
                self.ledger.update_transaction_for(
                    owner.as_deref(),
                    &id,
                    TransactionUpdate {
                        status: Some(TxStatus::Failed),
                        tx_hash: last_hash,
                        details: None,
                    },
                );
                let class = classify(&source);
                match class {
                    ErrorClass::UserRejected => {
                        info!(id = %id, kind = ?kind, "Transaction cancelled by user")
                    }
                    ErrorClass::Failure => {
                        warn!(id = %id, kind = ?kind, error = %source, "Transaction failed")
                    }
                }
                Err(SubmitError { id, class, source })
            }
        }
    }

    async fn run_steps(
        &self,
        steps: &[TxRequest],
        last_hash: &mut Option<String>,
    ) -> Result<(String, Receipt), SyncError> {
        let client = self
            .slot
            .get()
            .ok_or(SyncError::ClientUnavailable("wallet client"))?;

        let mut confirmed = None;
        for step in steps {
            let tx_hash = client.send_transaction(step).await?;
            *last_hash = Some(tx_hash.clone());
            let receipt = self
                .waiter
                .wait_for_receipt(&tx_hash, self.confirmations)
                .await?;
            if receipt.status == ReceiptStatus::Reverted {
                return Err(ChainError::Reverted { tx_hash }.into());
            }
            confirmed = Some((tx_hash, receipt));
        }
        confirmed.ok_or_else(|| SyncError::Callback("no transaction steps".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;
    use strata_store::MemoryStore;
    use strata_types::{CallOutcome, ContractCall, TxType};

    use crate::ledger::LedgerConfig;

    #[derive(Default)]
    struct WalletChain {
        reject_function: Option<&'static str>,
        revert_function: Option<&'static str>,
        sent: Mutex<Vec<String>>,
        before_receipt: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl ChainClient for WalletChain {
        async fn read(&self, _call: &ContractCall) -> std::result::Result<Value, ChainError> {
            Ok(Value::Null)
        }

        async fn batch_read(&self, calls: &[ContractCall]) -> Vec<CallOutcome> {
            calls.iter().map(|_| CallOutcome::failure("unused")).collect()
        }

        async fn send_transaction(
            &self,
            request: &TxRequest,
        ) -> std::result::Result<String, ChainError> {
            let name = request.call.function_name.clone();
            if self.reject_function == Some(name.as_str()) {
                return Err(ChainError::Rpc {
                    code: 4001,
                    message: "User rejected the request.".into(),
                });
            }
            let mut sent = self.sent.lock().expect("lock");
            sent.push(name.clone());
            Ok(format!("0x{}{}", sent.len(), name))
        }

        async fn wait_for_receipt(
            &self,
            tx_hash: &str,
            confirmations: u64,
        ) -> std::result::Result<Receipt, ChainError> {
            let hook = self.before_receipt.lock().expect("lock").take();
            if let Some(hook) = hook {
                hook();
            }
            let reverted = self
                .revert_function
                .is_some_and(|f| tx_hash.ends_with(f));
            Ok(Receipt {
                transaction_hash: tx_hash.to_string(),
                block_number: 7,
                status: if reverted {
                    ReceiptStatus::Reverted
                } else {
                    ReceiptStatus::Success
                },
                confirmations,
            })
        }
    }

    fn setup(chain: WalletChain) -> (Arc<WalletChain>, Arc<TransactionLedger>, TransactionFlow<WalletChain>) {
        let chain = Arc::new(chain);
        let ledger = Arc::new(TransactionLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::default(),
        ));
        ledger.load_history(Some("0xaa"));
        let flow = TransactionFlow::new(ClientSlot::new(chain.clone()), ledger.clone());
        (chain, ledger, flow)
    }

    fn step(function: &str) -> TxRequest {
        ContractCall::new("0xvault", function).into()
    }

    #[tokio::test]
    async fn test_success_marks_entry_with_hash() {
        let (_, ledger, flow) = setup(WalletChain::default());
        let submitted = flow
            .submit(
                NewTransaction::pending(TxType::Deposit, "100", "USDT"),
                step("deposit"),
            )
            .await
            .expect("submitted");

        let entry = ledger.get(&submitted.id).expect("entry");
        assert_eq!(entry.status, TxStatus::Success);
        assert_eq!(entry.tx_hash.as_deref(), Some(submitted.tx_hash.as_str()));
        assert_eq!(submitted.receipt.confirmations, 1);
    }

    #[tokio::test]
    async fn test_user_rejection_marks_failed_and_classifies() {
        let (_, ledger, flow) = setup(WalletChain {
            reject_function: Some("withdraw"),
            ..Default::default()
        });
        let err = flow
            .submit(
                NewTransaction::pending(TxType::Withdraw, "5", "USDT"),
                step("withdraw"),
            )
            .await
            .expect_err("rejected");

        assert!(err.is_user_rejected());
        let entry = ledger.get(&err.id).expect("entry");
        assert_eq!(entry.status, TxStatus::Failed);
        assert!(entry.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_swap_with_approval_uses_last_hash() {
        let (chain, ledger, flow) = setup(WalletChain::default());
        let submitted = flow
            .submit_steps(
                NewTransaction::pending(TxType::Swap, "1", "USDT").with_details("USDT -> ETH"),
                vec![step("approve"), step("swap")],
            )
            .await
            .expect("submitted");

        assert_eq!(*chain.sent.lock().expect("lock"), vec!["approve", "swap"]);
        assert_eq!(submitted.tx_hash, "0x2swap");
        assert_eq!(ledger.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_revert_marks_failed_with_hash() {
        let (_, ledger, flow) = setup(WalletChain {
            revert_function: Some("purchase"),
            ..Default::default()
        });
        let err = flow
            .submit(
                NewTransaction::pending(TxType::Purchase, "20", "YD"),
                step("purchase"),
            )
            .await
            .expect_err("reverted");

        assert_eq!(err.class, ErrorClass::Failure);
        let entry = ledger.get(&err.id).expect("entry");
        assert_eq!(entry.status, TxStatus::Failed);
        assert_eq!(entry.tx_hash.as_deref(), Some("0x1purchase"));
    }

    #[tokio::test]
    async fn test_missing_wallet_client() {
        let ledger = Arc::new(TransactionLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::default(),
        ));
        let flow: TransactionFlow<WalletChain> = TransactionFlow::new(ClientSlot::empty(), ledger.clone());
        let err = flow
            .submit(
                NewTransaction::pending(TxType::BuyToken, "1", "ETH"),
                step("buy"),
            )
            .await
            .expect_err("no client");
        assert!(matches!(err.source, SyncError::ClientUnavailable(_)));
        assert_eq!(ledger.get(&err.id).expect("entry").status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_account_switch_while_confirming_settles_original_entry() {
        let chain = Arc::new(WalletChain::default());
        let ledger = Arc::new(TransactionLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::default(),
        ));
        ledger.load_history(Some("0xaa"));
        let switcher = ledger.clone();
        *chain.before_receipt.lock().expect("lock") =
            Some(Box::new(move || switcher.load_history(Some("0xbb"))));
        let flow = TransactionFlow::new(ClientSlot::new(chain.clone()), ledger.clone());

        let submitted = flow
            .submit(
                NewTransaction::pending(TxType::Deposit, "100", "USDT"),
                step("deposit"),
            )
            .await
            .expect("submitted");

        assert_eq!(ledger.address().as_deref(), Some("0xbb"));
        assert!(ledger.transactions().is_empty());

        ledger.load_history(Some("0xaa"));
        let entry = ledger.get(&submitted.id).expect("entry");
        assert_eq!(entry.status, TxStatus::Success);
        assert_eq!(entry.tx_hash.as_deref(), Some(submitted.tx_hash.as_str()));
    }
}

//! Waiting for transaction finality.

use strata_types::{Receipt, DEFAULT_CONFIRMATIONS};
use tracing::debug;

use crate::client::{ChainClient, ClientSlot};
use crate::error::{Result, SyncError};

/// Narrow adapter over the client's receipt polling.
///
/// Checks that a client is connected and passes the confirmation depth
/// through. Polling and backoff belong to the client; its failures are
/// returned unchanged.
pub struct ConfirmationWaiter<C> {
    slot: ClientSlot<C>,
}

impl<C> Clone for ConfirmationWaiter<C> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<C: ChainClient> ConfirmationWaiter<C> {
    pub fn new(slot: ClientSlot<C>) -> Self {
        Self { slot }
    }

    /// Wait for one confirmation.
    pub async fn wait(&self, tx_hash: &str) -> Result<Receipt> {
        self.wait_for_receipt(tx_hash, DEFAULT_CONFIRMATIONS).await
    }

    pub async fn wait_for_receipt(&self, tx_hash: &str, confirmations: u64) -> Result<Receipt> {
        let client = self
            .slot
            .get()
            .ok_or(SyncError::ClientUnavailable("public client"))?;
        debug!(tx_hash, confirmations, "Waiting for receipt");
        let receipt = client.wait_for_receipt(tx_hash, confirmations).await?;
        debug!(
            tx_hash,
            block = receipt.block_number,
            status = ?receipt.status,
            "Receipt received"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use strata_types::{CallOutcome, ContractCall, ReceiptStatus, TxRequest};

    #[derive(Default)]
    struct ReceiptChain {
        seen: Mutex<Vec<(String, u64)>>,
        drop_all: bool,
    }

    impl ChainClient for ReceiptChain {
        async fn read(&self, _call: &ContractCall) -> std::result::Result<Value, ChainError> {
            Ok(Value::Null)
        }

        async fn batch_read(&self, calls: &[ContractCall]) -> Vec<CallOutcome> {
            calls.iter().map(|_| CallOutcome::failure("unused")).collect()
        }

        async fn send_transaction(
            &self,
            _request: &TxRequest,
        ) -> std::result::Result<String, ChainError> {
            Ok("0x1".into())
        }

        async fn wait_for_receipt(
            &self,
            tx_hash: &str,
            confirmations: u64,
        ) -> std::result::Result<Receipt, ChainError> {
            self.seen
                .lock()
                .expect("lock")
                .push((tx_hash.to_string(), confirmations));
            if self.drop_all {
                return Err(ChainError::Dropped {
                    tx_hash: tx_hash.to_string(),
                });
            }
            Ok(Receipt {
                transaction_hash: tx_hash.to_string(),
                block_number: 42,
                status: ReceiptStatus::Success,
                confirmations,
            })
        }
    }

    #[tokio::test]
    async fn test_missing_client_fails_fast() {
        let waiter: ConfirmationWaiter<ReceiptChain> = ConfirmationWaiter::new(ClientSlot::empty());
        let err = waiter.wait("0xabc").await.expect_err("no client");
        assert!(matches!(err, SyncError::ClientUnavailable(_)));
        assert_eq!(err.to_string(), "public client not available");
    }

    #[tokio::test]
    async fn test_confirmations_pass_through() {
        let chain = Arc::new(ReceiptChain::default());
        let waiter = ConfirmationWaiter::new(ClientSlot::new(chain.clone()));

        let receipt = waiter.wait_for_receipt("0xabc", 3).await.expect("receipt");
        assert_eq!(receipt.confirmations, 3);
        waiter.wait("0xdef").await.expect("receipt");

        let seen = chain.seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![("0xabc".to_string(), 3), ("0xdef".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_client_failure_is_not_swallowed() {
        let chain = Arc::new(ReceiptChain {
            drop_all: true,
            ..Default::default()
        });
        let waiter = ConfirmationWaiter::new(ClientSlot::new(chain));
        let err = waiter.wait("0xabc").await.expect_err("dropped");
        assert!(matches!(
            err,
            SyncError::Chain(ChainError::Dropped { ref tx_hash }) if tx_hash == "0xabc"
        ));
    }

    #[tokio::test]
    async fn test_client_attached_later() {
        let slot = ClientSlot::empty();
        let waiter = ConfirmationWaiter::new(slot.clone());
        assert!(waiter.wait("0x1").await.is_err());
        slot.set(Some(Arc::new(ReceiptChain::default())));
        assert!(waiter.wait("0x1").await.is_ok());
    }
}

//! Inspection certificates

use super::{ensure_absent, ensure_present, SupplyChainContract};
use crate::auth::Operation;
use crate::context::TxContext;
use crate::events::ContractEvent;
use crate::records::{BatchStatus, Certificate};
use crate::types::{BatchId, CertId};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Arguments of `verifyBatch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBatchRequest {
    /// Batch under inspection
    pub batch_id: BatchId,
    /// New certificate id
    pub cert_id: CertId,
    /// Inspector identity
    pub issuer_id: String,
    /// Certificate type
    pub cert_type: String,
    /// Certificate document hash
    pub cert_hash: String,
    /// Certificate metadata content id
    #[serde(rename = "certMetaCID")]
    pub cert_meta_cid: String,
}

impl SupplyChainContract {
    /// Issue a certificate for a batch and mark it VERIFIED.
    ///
    /// A batch that already moved keeps its TRANSFERRED status; the
    /// certificate is still recorded.
    pub fn verify_batch(
        &self,
        ctx: &mut TxContext<'_>,
        req: VerifyBatchRequest,
    ) -> Result<Certificate> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::VerifyBatch, &caller)?;

        req.batch_id.validate()?;
        req.cert_id.validate()?;
        ensure_present("issuerId", &req.issuer_id)?;

        let mut batch = self.load_batch(ctx, &req.batch_id)?;
        ensure_absent::<Certificate>(ctx, &req.cert_id.key())?;
        self.ensure_active(&batch, Operation::VerifyBatch)?;

        let cert = Certificate {
            cert_id: req.cert_id,
            batch_id: req.batch_id,
            issuer_org: caller.msp_id,
            issuer_id: req.issuer_id,
            cert_type: req.cert_type,
            cert_hash: req.cert_hash,
            cert_meta_cid: req.cert_meta_cid,
            issued_at: ctx.tx_timestamp(),
            tx_id: ctx.tx_id().to_string(),
        };

        batch.status = batch.status.advance(BatchStatus::Verified);
        batch.last_tx = ctx.tx_id().to_string();

        ctx.put_record(&cert)?;
        ctx.put_record(&batch)?;

        ctx.set_event(ContractEvent::BatchVerified {
            batch_id: cert.batch_id.clone(),
            cert_id: cert.cert_id.clone(),
            cert_type: cert.cert_type.clone(),
            issuer_id: cert.issuer_id.clone(),
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(cert_id = %cert.cert_id, batch_id = %cert.batch_id, "Batch verified");
        Ok(cert)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::super::{Invocation, RecordTransferRequest};
    use super::*;
    use crate::types::{MspId, TransferId};
    use crate::Error;
    use rust_decimal::Decimal;

    fn verify(cert: &str, batch: &str) -> Invocation {
        Invocation::VerifyBatch(VerifyBatchRequest {
            batch_id: BatchId::new(batch),
            cert_id: CertId::new(cert),
            issuer_id: "inspector-7".to_string(),
            cert_type: "ORGANIC".to_string(),
            cert_hash: "0xcert".to_string(),
            cert_meta_cid: "QmCert".to_string(),
        })
    }

    #[test]
    fn test_verify_marks_batch_verified() {
        let mut h = Harness::new();
        h.call(FARMER, create_batch("B1", 100)).unwrap();

        let record = h.call(INSPECTOR, verify("C1", "B1")).unwrap();
        match record {
            crate::records::Record::Cert(cert) => {
                assert_eq!(cert.issuer_org.as_str(), INSPECTOR);
                assert_eq!(cert.tx_id, "tx-2");
            }
            other => panic!("unexpected record {:?}", other),
        }

        let batch = h.batch("B1");
        assert_eq!(batch.status, BatchStatus::Verified);
        assert_eq!(batch.last_tx, "tx-2");
        assert_eq!(batch.current_qty_kg, Decimal::from(100));
    }

    #[test]
    fn test_only_inspectors_verify() {
        let mut h = Harness::new();
        h.call(FARMER, create_batch("B1", 100)).unwrap();
        for msp in [FARMER, PLATFORM, MIDDLEMAN] {
            let err = h.call(msp, verify("C1", "B1")).unwrap_err();
            assert!(matches!(err, Error::Unauthorized(_)), "{}", msp);
        }
        assert!(h.raw(&CertId::new("C1").key()).is_none());
    }

    #[test]
    fn test_verify_missing_batch() {
        let mut h = Harness::new();
        let err = h.call(INSPECTOR, verify("C1", "B404")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(h.raw(&CertId::new("C1").key()).is_none());
    }

    #[test]
    fn test_duplicate_certificate_rejected() {
        let mut h = Harness::new();
        h.call(FARMER, create_batch("B1", 100)).unwrap();
        h.call(INSPECTOR, verify("C1", "B1")).unwrap();
        let err = h.call(INSPECTOR, verify("C1", "B1")).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_verify_after_transfer_keeps_transferred() {
        let mut h = Harness::new();
        h.call(FARMER, create_batch("B1", 100)).unwrap();
        h.call(
            FARMER,
            Invocation::RecordTransfer(RecordTransferRequest {
                transfer_id: TransferId::new("T1"),
                batch_id: BatchId::new("B1"),
                from_id: "farmer-1".to_string(),
                to_org: MspId::new(MIDDLEMAN),
                to_id: "mm-1".to_string(),
                quantity_kg: Decimal::from(10),
                location_hash: "geo".to_string(),
            }),
        )
        .unwrap();

        h.call(INSPECTOR, verify("C1", "B1")).unwrap();
        assert_eq!(h.batch("B1").status, BatchStatus::Transferred);
        assert!(h.raw(&CertId::new("C1").key()).is_some());
    }
}

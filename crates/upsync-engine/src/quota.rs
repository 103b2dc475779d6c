//! Quota Ledger
//!
//! Every company gets its own actor task that owns its `StorageQuota` row plus the
//! provisional holds of in-flight sessions. Requests for different companies never
//! contend; requests for one company are serialized by its mailbox.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use upsync_core::models::{QuotaSnapshot, StorageQuota};
use upsync_core::{AppError, UploadStore};
use uuid::Uuid;

/// Provisional hold against a company's storage limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationHandle {
    pub id: Uuid,
    pub company_id: Uuid,
}

enum QuotaCommand {
    Reserve {
        bytes: u64,
        response: oneshot::Sender<Result<ReservationHandle, AppError>>,
    },
    Extend {
        reservation_id: Uuid,
        bytes: u64,
        response: oneshot::Sender<Result<u64, AppError>>,
    },
    Commit {
        reservation_id: Uuid,
        actual_bytes: u64,
        files: u64,
        response: oneshot::Sender<Result<StorageQuota, AppError>>,
    },
    Release {
        reservation_id: Uuid,
        response: oneshot::Sender<u64>,
    },
    Snapshot {
        response: oneshot::Sender<QuotaSnapshot>,
    },
    SetLimit {
        limit: u64,
        response: oneshot::Sender<Result<StorageQuota, AppError>>,
    },
}

/// State owned by one company actor.
struct CompanyQuota {
    quota: StorageQuota,
    reservations: HashMap<Uuid, u64>,
    store: Arc<dyn UploadStore>,
}

impl CompanyQuota {
    fn pending(&self) -> u64 {
        self.reservations.values().sum()
    }

    fn check(&self, bytes: u64) -> Result<(), AppError> {
        let available = self.quota.available(self.pending());
        if bytes > available {
            return Err(AppError::QuotaExceeded {
                company_id: self.quota.company_id,
                requested: bytes,
                available,
            });
        }
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save_quota(&self.quota).await {
            warn!(
                company_id = %self.quota.company_id,
                error = %e,
                "Failed to persist storage quota"
            );
        }
    }

    fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            quota: self.quota.clone(),
            pending_bytes: self.pending(),
            active_reservations: self.reservations.len(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<QuotaCommand>) {
        let company_id = self.quota.company_id;
        debug!(company_id = %company_id, "Quota actor started");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                QuotaCommand::Reserve { bytes, response } => {
                    let result = self.check(bytes).map(|_| {
                        let id = Uuid::new_v4();
                        self.reservations.insert(id, bytes);
                        debug!(
                            company_id = %company_id,
                            reservation_id = %id,
                            bytes = bytes,
                            pending = self.pending(),
                            "Quota reserved"
                        );
                        ReservationHandle { id, company_id }
                    });
                    if let Err(e) = &result {
                        info!(company_id = %company_id, error = %e, "Quota reservation rejected");
                    }
                    let _ = response.send(result);
                }

                QuotaCommand::Extend {
                    reservation_id,
                    bytes,
                    response,
                } => {
                    let result = if !self.reservations.contains_key(&reservation_id) {
                        Err(AppError::InvalidInput(format!(
                            "Unknown reservation {}",
                            reservation_id
                        )))
                    } else {
                        self.check(bytes).map(|_| {
                            let held = self.reservations.entry(reservation_id).or_insert(0);
                            *held += bytes;
                            *held
                        })
                    };
                    let _ = response.send(result);
                }

                QuotaCommand::Commit {
                    reservation_id,
                    actual_bytes,
                    files,
                    response,
                } => {
                    let result = match self.reservations.remove(&reservation_id) {
                        Some(reserved) => {
                            let committed = actual_bytes.min(reserved);
                            self.quota.storage_used_bytes += committed;
                            self.quota.file_count += files;
                            self.quota.last_calculated_at = Utc::now();
                            info!(
                                company_id = %company_id,
                                reservation_id = %reservation_id,
                                committed = committed,
                                released = reserved - committed,
                                used = self.quota.storage_used_bytes,
                                "Quota committed"
                            );
                            self.persist().await;
                            Ok(self.quota.clone())
                        }
                        None => Err(AppError::InvalidInput(format!(
                            "Unknown reservation {}",
                            reservation_id
                        ))),
                    };
                    let _ = response.send(result);
                }

                QuotaCommand::Release {
                    reservation_id,
                    response,
                } => {
                    let released = self.reservations.remove(&reservation_id).unwrap_or(0);
                    if released > 0 {
                        debug!(
                            company_id = %company_id,
                            reservation_id = %reservation_id,
                            released = released,
                            "Quota released"
                        );
                    }
                    let _ = response.send(released);
                }

                QuotaCommand::Snapshot { response } => {
                    let _ = response.send(self.snapshot());
                }

                QuotaCommand::SetLimit { limit, response } => {
                    let floor = self.quota.storage_used_bytes + self.pending();
                    let result = if limit < floor {
                        Err(AppError::InvalidInput(format!(
                            "Limit {} is below committed usage {} plus pending holds {}",
                            limit,
                            self.quota.storage_used_bytes,
                            self.pending()
                        )))
                    } else {
                        self.quota.storage_limit_bytes = limit;
                        self.quota.last_calculated_at = Utc::now();
                        self.persist().await;
                        Ok(self.quota.clone())
                    };
                    let _ = response.send(result);
                }
            }
        }

        debug!(company_id = %company_id, "Quota actor stopped");
    }
}

/// Handle to one company's quota actor.
#[derive(Clone)]
struct CompanyQuotaHandle {
    command_tx: mpsc::Sender<QuotaCommand>,
}

impl CompanyQuotaHandle {
    fn spawn(
        company_id: Uuid,
        default_limit: u64,
        mailbox: usize,
        store: Arc<dyn UploadStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(mailbox);

        tokio::spawn(async move {
            let quota = match store.load_quota(company_id).await {
                Ok(Some(quota)) => quota,
                Ok(None) => StorageQuota::new(company_id, default_limit, Utc::now()),
                Err(e) => {
                    warn!(
                        company_id = %company_id,
                        error = %e,
                        "Failed to load storage quota, starting from default"
                    );
                    StorageQuota::new(company_id, default_limit, Utc::now())
                }
            };
            let state = CompanyQuota {
                quota,
                reservations: HashMap::new(),
                store,
            };
            state.run(rx).await;
        });

        Self { command_tx: tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> QuotaCommand,
    ) -> Result<T, AppError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| AppError::Unavailable("Quota actor unavailable".to_string()))?;
        rx.await
            .map_err(|_| AppError::Unavailable("Quota response channel closed".to_string()))
    }
}

/// Routes quota operations to per-company actors.
pub struct QuotaLedger {
    companies: DashMap<Uuid, CompanyQuotaHandle>,
    store: Arc<dyn UploadStore>,
    default_limit: u64,
    mailbox: usize,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn UploadStore>, default_limit: u64, mailbox: usize) -> Self {
        Self {
            companies: DashMap::new(),
            store,
            default_limit,
            mailbox,
        }
    }

    fn company(&self, company_id: Uuid) -> CompanyQuotaHandle {
        self.companies
            .entry(company_id)
            .or_insert_with(|| {
                CompanyQuotaHandle::spawn(
                    company_id,
                    self.default_limit,
                    self.mailbox,
                    self.store.clone(),
                )
            })
            .clone()
    }

    /// Hold `bytes` against the company limit, counting other in-flight holds.
    pub async fn reserve(&self, company_id: Uuid, bytes: u64) -> Result<ReservationHandle, AppError> {
        self.company(company_id)
            .request(|response| QuotaCommand::Reserve { bytes, response })
            .await?
    }

    /// Grow an existing hold. Returns the new held total.
    pub async fn extend(&self, handle: &ReservationHandle, bytes: u64) -> Result<u64, AppError> {
        let reservation_id = handle.id;
        self.company(handle.company_id)
            .request(|response| QuotaCommand::Extend {
                reservation_id,
                bytes,
                response,
            })
            .await?
    }

    /// Turn up to the held amount into committed usage and drop the rest of the hold.
    pub async fn commit(
        &self,
        handle: &ReservationHandle,
        actual_bytes: u64,
        files: u64,
    ) -> Result<StorageQuota, AppError> {
        let reservation_id = handle.id;
        self.company(handle.company_id)
            .request(|response| QuotaCommand::Commit {
                reservation_id,
                actual_bytes,
                files,
                response,
            })
            .await?
    }

    /// Drop a hold without committing. Returns the released bytes; unknown holds release 0.
    pub async fn release(&self, handle: &ReservationHandle) -> Result<u64, AppError> {
        let reservation_id = handle.id;
        self.company(handle.company_id)
            .request(|response| QuotaCommand::Release {
                reservation_id,
                response,
            })
            .await
    }

    pub async fn snapshot(&self, company_id: Uuid) -> Result<QuotaSnapshot, AppError> {
        self.company(company_id)
            .request(|response| QuotaCommand::Snapshot { response })
            .await
    }

    pub async fn set_limit(&self, company_id: Uuid, limit: u64) -> Result<StorageQuota, AppError> {
        self.company(company_id)
            .request(|response| QuotaCommand::SetLimit { limit, response })
            .await?
    }

    /// Number of companies with a live actor
    pub fn company_count(&self) -> usize {
        self.companies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryUploadStore;

    fn ledger(limit: u64) -> QuotaLedger {
        QuotaLedger::new(Arc::new(MemoryUploadStore::new()), limit, 16)
    }

    #[tokio::test]
    async fn test_reserve_exact_remaining_succeeds_one_over_fails() {
        let ledger = ledger(2_000_000);
        let company = Uuid::new_v4();

        let err = ledger.reserve(company, 2_000_001).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::QuotaExceeded {
                requested: 2_000_001,
                available: 2_000_000,
                ..
            }
        ));
        assert_eq!(err.quota_overshoot(), Some(1));

        assert!(ledger.reserve(company, 2_000_000).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_holds_count_against_limit() {
        let ledger = ledger(1_000);
        let company = Uuid::new_v4();

        let first = ledger.reserve(company, 600).await.unwrap();
        assert!(ledger.reserve(company, 600).await.is_err());

        ledger.release(&first).await.unwrap();
        assert!(ledger.reserve(company, 600).await.is_ok());
    }

    #[tokio::test]
    async fn test_commit_clamps_to_reservation_and_releases_remainder() {
        let ledger = ledger(1_000);
        let company = Uuid::new_v4();

        let handle = ledger.reserve(company, 800).await.unwrap();
        let quota = ledger.commit(&handle, 5_000, 2).await.unwrap();
        assert_eq!(quota.storage_used_bytes, 800);
        assert_eq!(quota.file_count, 2);

        let handle = ledger.reserve(company, 200).await.unwrap();
        let quota = ledger.commit(&handle, 50, 1).await.unwrap();
        assert_eq!(quota.storage_used_bytes, 850);

        let snapshot = ledger.snapshot(company).await.unwrap();
        assert_eq!(snapshot.pending_bytes, 0);
        assert_eq!(snapshot.available(), 150);
        assert!(snapshot.quota.storage_used_bytes <= snapshot.quota.storage_limit_bytes);
    }

    #[tokio::test]
    async fn test_double_commit_is_rejected() {
        let ledger = ledger(1_000);
        let handle = ledger.reserve(Uuid::new_v4(), 100).await.unwrap();
        ledger.commit(&handle, 100, 1).await.unwrap();
        assert!(ledger.commit(&handle, 100, 1).await.is_err());
        assert_eq!(ledger.release(&handle).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extend_respects_limit() {
        let ledger = ledger(1_000);
        let company = Uuid::new_v4();
        let handle = ledger.reserve(company, 400).await.unwrap();
        assert_eq!(ledger.extend(&handle, 500).await.unwrap(), 900);
        assert!(matches!(
            ledger.extend(&handle, 101).await,
            Err(AppError::QuotaExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_over_commit() {
        let ledger = Arc::new(ledger(10_000));
        let company = Uuid::new_v4();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move { ledger.reserve(company, 300).await }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 33);
        let snapshot = ledger.snapshot(company).await.unwrap();
        assert_eq!(snapshot.pending_bytes, 9_900);
    }

    #[tokio::test]
    async fn test_set_limit_below_usage_rejected() {
        let ledger = ledger(1_000);
        let company = Uuid::new_v4();
        let handle = ledger.reserve(company, 500).await.unwrap();
        ledger.commit(&handle, 500, 1).await.unwrap();
        assert!(ledger.set_limit(company, 499).await.is_err());
        assert_eq!(ledger.set_limit(company, 5_000).await.unwrap().storage_limit_bytes, 5_000);
    }

    #[tokio::test]
    async fn test_set_limit_below_pending_holds_rejected() {
        let ledger = ledger(1_000);
        let company = Uuid::new_v4();
        let handle = ledger.reserve(company, 800).await.unwrap();

        assert!(matches!(
            ledger.set_limit(company, 100).await,
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(ledger.set_limit(company, 800).await.unwrap().storage_limit_bytes, 800);

        let quota = ledger.commit(&handle, 800, 1).await.unwrap();
        assert_eq!(quota.storage_used_bytes, 800);
        assert!(quota.storage_used_bytes <= quota.storage_limit_bytes);
    }
}

//! LedgerService gRPC implementation

use std::sync::Arc;

use converge_proto::ledger::ledger_service_server::LedgerService;
use converge_proto::{
    AppendRequest, AppendResponse, EntryRecord, GetRequest, GetResponse, LoadRequest,
    LoadResponse, SnapshotMeta, SnapshotRequest, SnapshotResponse, WatchRequest,
};
use converge_store::{GetOptions, LedgerError, LedgerStore, LoadOptions, WATCH_CHANNEL_CAPACITY};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

pub struct LedgerServiceImpl {
    store: Arc<LedgerStore>,
}

impl LedgerServiceImpl {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

/// The single place where core errors become status codes.
fn status_from(err: LedgerError) -> Status {
    let message = err.to_string();
    match err {
        LedgerError::ContextAlreadyExists(_) => Status::already_exists(message),
        LedgerError::InvalidContextId
        | LedgerError::InvalidSnapshotFormat(_)
        | LedgerError::UnsupportedSnapshotVersion { .. } => Status::invalid_argument(message),
        LedgerError::IntegrityVerificationFailed { .. } | LedgerError::HashMismatch { .. } => {
            Status::data_loss(message)
        }
        LedgerError::PayloadTooLarge { .. } => Status::resource_exhausted(message),
        LedgerError::LockTimeout(_)
        | LedgerError::AppendFailed(_)
        | LedgerError::GetFailed(_)
        | LedgerError::SnapshotFailed(_)
        | LedgerError::LoadFailed(_)
        | LedgerError::SequenceFailed(_)
        | LedgerError::LamportTimeFailed(_) => Status::internal(message),
    }
}

fn key_filter(key: String) -> Option<String> {
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[tonic::async_trait]
impl LedgerService for LedgerServiceImpl {
    async fn append(
        &self,
        request: Request<AppendRequest>,
    ) -> Result<Response<AppendResponse>, Status> {
        let req = request.into_inner();
        let entry = if req.received_lamport_time > 0 {
            self.store.append_with_received_time(
                &req.context_id,
                &req.key,
                req.payload,
                req.received_lamport_time,
                req.metadata,
            )
        } else {
            self.store
                .append(&req.context_id, &req.key, req.payload, req.metadata)
        }
        .map_err(status_from)?;

        Ok(Response::new(AppendResponse {
            entry: Some(entry.into()),
        }))
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        let (entries, latest_sequence) = self
            .store
            .get(
                &req.context_id,
                GetOptions {
                    key: key_filter(req.key),
                    after_sequence: req.after_sequence,
                    limit: req.limit,
                },
            )
            .map_err(status_from)?;

        Ok(Response::new(GetResponse {
            entries: entries.into_iter().map(EntryRecord::from).collect(),
            latest_sequence,
        }))
    }

    async fn snapshot(
        &self,
        request: Request<SnapshotRequest>,
    ) -> Result<Response<SnapshotResponse>, Status> {
        let req = request.into_inner();
        let snapshot = self.store.snapshot(&req.context_id).map_err(status_from)?;

        Ok(Response::new(SnapshotResponse {
            blob: snapshot.blob,
            sequence: snapshot.sequence,
            meta: Some(SnapshotMeta {
                created_at_ns: snapshot.info.created_at_ns,
                entry_count: snapshot.info.entry_count,
                version: snapshot.info.version,
                merkle_root: snapshot.info.merkle_root,
            }),
        }))
    }

    async fn load(&self, request: Request<LoadRequest>) -> Result<Response<LoadResponse>, Status> {
        let req = request.into_inner();
        let (entries_restored, latest_sequence) = self
            .store
            .load(
                &req.context_id,
                &req.blob,
                LoadOptions {
                    fail_if_exists: req.fail_if_exists,
                    ..Default::default()
                },
            )
            .map_err(status_from)?;

        Ok(Response::new(LoadResponse {
            entries_restored,
            latest_sequence,
        }))
    }

    type WatchStream = ReceiverStream<Result<EntryRecord, Status>>;

    async fn watch(
        &self,
        request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let req = request.into_inner();
        let key = key_filter(req.key);

        // Subscribe before the catch-up read so no commit can fall
        // between the two; live entries queue up in the subscription
        // while catch-up streams, and the sequence watermark drops any
        // duplicate when the queue drains.
        let mut subscription = self.store.subscribe(&req.context_id, key.clone());
        let (backlog, _) = self
            .store
            .get(
                &req.context_id,
                GetOptions {
                    key,
                    after_sequence: req.from_sequence,
                    limit: 0,
                },
            )
            .map_err(status_from)?;

        debug!(
            context_id = %req.context_id,
            backlog = backlog.len(),
            from_sequence = req.from_sequence,
            "watch stream opened"
        );

        let from_sequence = req.from_sequence;
        let (tx, rx) = tokio::sync::mpsc::channel(WATCH_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut delivered = from_sequence;
            for entry in backlog {
                delivered = entry.sequence;
                if tx.send(Ok(entry.into())).await.is_err() {
                    return;
                }
            }
            while let Some(entry) = subscription.recv().await {
                if entry.sequence <= delivered {
                    continue;
                }
                delivered = entry.sequence;
                if tx.send(Ok(entry.into())).await.is_err() {
                    return;
                }
            }
            // Subscription evicted (slow consumer); the stream ends and
            // the client can re-watch from its last seen sequence.
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(LedgerError, tonic::Code)> = vec![
            (
                LedgerError::ContextAlreadyExists("ctx".into()),
                tonic::Code::AlreadyExists,
            ),
            (
                LedgerError::InvalidSnapshotFormat("bad magic".into()),
                tonic::Code::InvalidArgument,
            ),
            (
                LedgerError::UnsupportedSnapshotVersion {
                    version: 9,
                    supported: 2,
                },
                tonic::Code::InvalidArgument,
            ),
            (
                LedgerError::IntegrityVerificationFailed {
                    expected: converge_model::Hash::ZERO,
                    computed: converge_model::Hash::ZERO,
                },
                tonic::Code::DataLoss,
            ),
            (
                LedgerError::PayloadTooLarge { size: 9, max: 4 },
                tonic::Code::ResourceExhausted,
            ),
            (
                LedgerError::AppendFailed("boom".into()),
                tonic::Code::Internal,
            ),
            (
                LedgerError::LockTimeout(Duration::from_secs(5)),
                tonic::Code::Internal,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(status_from(err).code(), code);
        }
    }
}

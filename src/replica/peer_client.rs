use crate::commitlog::{LogIndex, LogTerm, TermIndexPair};
use crate::grpc::replicated_log_client::ReplicatedLogClient;
use crate::grpc::{
    ProtoAppendEntriesErrorReason, ProtoAppendEntriesRequest, ProtoAppendEntriesResult, ProtoLogEntry,
    ProtoTermIndexPair,
};
use crate::replica::follower::{
    AppendEntriesError, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, Follower, MessageId,
};
use crate::replica::peers::ParticipantId;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};

/// Follower on another host, reached over gRPC.
pub struct GrpcFollower {
    id: ParticipantId,
    inner: ReplicatedLogClient<Channel>,
}

impl GrpcFollower {
    pub async fn connect(logger: &slog::Logger, id: ParticipantId, url: String) -> Result<Self, ConnectError> {
        slog::info!(logger, "Connecting to {} at {} ...", id, url);
        let endpoint = Endpoint::from_shared(url)?;

        let connection = endpoint.connect().await?;

        Ok(GrpcFollower {
            id,
            inner: ReplicatedLogClient::new(connection),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid follower URI")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Failed to connect to follower")]
    ConnectFailure(#[from] tonic::transport::Error),
}

#[async_trait::async_trait]
impl Follower for GrpcFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesError> {
        // The generated client needs `&mut`, its channel is cheap to clone.
        let mut client = self.inner.clone();
        let rpc_reply = client
            .append_entries(tonic::Request::new(convert_append_entries_request(request)))
            .await
            .map_err(|status| AppendEntriesError::Communication(status.to_string()))?;

        convert_append_entries_result(rpc_reply.into_inner())
    }
}

fn convert_term_index_pair(pair: TermIndexPair) -> ProtoTermIndexPair {
    ProtoTermIndexPair {
        term: pair.term.as_u64(),
        index: pair.index.as_u64(),
    }
}

fn convert_append_entries_request(request: AppendEntriesRequest) -> ProtoAppendEntriesRequest {
    let entries = request
        .entries
        .iter_from(request.entries.first_index())
        .map(|entry| {
            let entry = entry.entry();
            ProtoLogEntry {
                term: entry.term().as_u64(),
                index: entry.index().as_u64(),
                has_payload: entry.has_payload(),
                payload: entry.payload().map(|p| p.as_bytes().to_vec()).unwrap_or_default(),
            }
        })
        .collect();

    ProtoAppendEntriesRequest {
        leader_term: request.leader_term.as_u64(),
        leader_id: request.leader_id.into_inner(),
        prev_log_entry: Some(convert_term_index_pair(request.prev_log_entry)),
        leader_commit: request.leader_commit.as_u64(),
        largest_common_index: request.largest_common_index.as_u64(),
        wait_for_sync: request.wait_for_sync,
        message_id: request.message_id.as_u64(),
        entries,
    }
}

fn convert_error_reason(reason: i32) -> Result<AppendEntriesErrorReason, AppendEntriesError> {
    let reason = ProtoAppendEntriesErrorReason::from_i32(reason)
        .ok_or_else(|| AppendEntriesError::MalformedReply(format!("Unknown error reason {}", reason)))?;

    Ok(match reason {
        ProtoAppendEntriesErrorReason::None => AppendEntriesErrorReason::None,
        ProtoAppendEntriesErrorReason::InvalidLeaderId => AppendEntriesErrorReason::InvalidLeaderId,
        ProtoAppendEntriesErrorReason::LostLogCore => AppendEntriesErrorReason::LostLogCore,
        ProtoAppendEntriesErrorReason::MessageOutdated => AppendEntriesErrorReason::MessageOutdated,
        ProtoAppendEntriesErrorReason::WrongTerm => AppendEntriesErrorReason::WrongTerm,
        ProtoAppendEntriesErrorReason::NoPrevLogMatch => AppendEntriesErrorReason::NoPrevLogMatch,
        ProtoAppendEntriesErrorReason::PersistenceFailure => AppendEntriesErrorReason::PersistenceFailure,
        ProtoAppendEntriesErrorReason::CommunicationError => AppendEntriesErrorReason::CommunicationError,
    })
}

fn convert_append_entries_result(reply: ProtoAppendEntriesResult) -> Result<AppendEntriesResult, AppendEntriesError> {
    let reason = convert_error_reason(reply.reason)?;
    let conflict = match (reason, reply.conflict) {
        (AppendEntriesErrorReason::NoPrevLogMatch, Some(pair)) => Some(TermIndexPair::new(
            LogTerm::new(pair.term),
            LogIndex::new(pair.index),
        )),
        (AppendEntriesErrorReason::NoPrevLogMatch, None) => {
            return Err(AppendEntriesError::MalformedReply(
                "NoPrevLogMatch without conflict position".to_string(),
            ))
        }
        _ => None,
    };

    Ok(AppendEntriesResult {
        log_term: LogTerm::new(reply.log_term),
        error_code: reply.error_code,
        reason,
        conflict,
        message_id: MessageId::new(reply.message_id),
        snapshot_available: reply.snapshot_available,
    })
}

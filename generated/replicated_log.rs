#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTermIndexPair {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub index: u64,
    /// Entries without payload are internal (e.g. leadership markers).
    #[prost(bool, tag = "3")]
    pub has_payload: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesRequest {
    #[prost(uint64, tag = "1")]
    pub leader_term: u64,
    #[prost(string, tag = "2")]
    pub leader_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub prev_log_entry: ::core::option::Option<ProtoTermIndexPair>,
    #[prost(uint64, tag = "4")]
    pub leader_commit: u64,
    #[prost(uint64, tag = "5")]
    pub largest_common_index: u64,
    #[prost(bool, tag = "6")]
    pub wait_for_sync: bool,
    #[prost(uint64, tag = "7")]
    pub message_id: u64,
    #[prost(message, repeated, tag = "8")]
    pub entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesResult {
    #[prost(uint64, tag = "1")]
    pub log_term: u64,
    #[prost(int32, tag = "2")]
    pub error_code: i32,
    #[prost(enumeration = "ProtoAppendEntriesErrorReason", tag = "3")]
    pub reason: i32,
    /// Only set when reason == NO_PREV_LOG_MATCH.
    #[prost(message, optional, tag = "4")]
    pub conflict: ::core::option::Option<ProtoTermIndexPair>,
    #[prost(uint64, tag = "5")]
    pub message_id: u64,
    #[prost(bool, tag = "6")]
    pub snapshot_available: bool,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoAppendEntriesErrorReason {
    None = 0,
    InvalidLeaderId = 1,
    LostLogCore = 2,
    MessageOutdated = 3,
    WrongTerm = 4,
    NoPrevLogMatch = 5,
    PersistenceFailure = 6,
    CommunicationError = 7,
}
#[doc = r" Generated client implementations."]
pub mod replicated_log_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Leader -> follower replication. A follower applies the entries after"]
    #[doc = " `prev_log_entry` and acknowledges with the same `message_id`."]
    pub struct ReplicatedLogClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl ReplicatedLogClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> ReplicatedLogClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn append_entries(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoAppendEntriesRequest>,
        ) -> Result<tonic::Response<super::ProtoAppendEntriesResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replicated_log.ReplicatedLog/AppendEntries");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for ReplicatedLogClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for ReplicatedLogClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "ReplicatedLogClient {{ ... }}")
        }
    }
}

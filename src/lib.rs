pub mod application;
pub mod cli;
pub mod connector;
pub mod domain;

pub use application::{
    CursorRepository, EmbeddingService, RecordRepository, RecordSource, RetryPolicy,
    SyncDeletionsUseCase, SyncPipelineUseCase, SyncStatusUseCase, VectorRepository,
};

pub use connector::{
    Container, ContainerConfig, DuckdbCursorRepository, DuckdbRecordRepository, HttpEmbedding,
    HttpRecordSource, InMemoryVectorRepository, MockEmbedding, PostgresCursorRepository,
    PostgresRecordRepository, QdrantVectorRepository, Settings, StaticRecordSource,
};

pub use domain::{
    CanonicalRecord, DomainError, EmbeddingConfig, EmbeddingStatus, EmbeddingVector,
    PersistedRecord, RecordNormalizer, RecordSchema, RunMode, SyncCursor, SyncOutcome, SyncReport,
    SyncStatus, FATAL_EXIT_CODE,
};

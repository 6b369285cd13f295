#![doc = include_str!("../README.md")]

pub use refold_core::{
    AccessStrategy, CachingStrategy, Category, ConfigError, Decider, EventCodec, EventContext,
    EventData, EventType, Fold, JsonCodec, LoadOption, Position, StateCache, StreamName,
    StreamNameError, StreamToken, SyncResult, TimelineEvent, TransactError, access, cache,
    category, decider, event, fold, stream, token,
};

pub mod store {
    pub use refold_core::store::{
        AppendOutcome, EventStore, ExpectedVersion, Operation, OriginPredicate, StoreError, memory,
    };

    #[cfg(feature = "docstore")]
    #[cfg_attr(docsrs, doc(cfg(feature = "docstore")))]
    pub mod docstore {
        pub use refold_docstore::{
            BatchDocument, DocumentClient, DocumentStore, EventDocument, MemoryDocumentClient,
            ReplaceOutcome, TipDocument, UnfoldDocument,
        };
    }

    #[cfg(feature = "messagedb")]
    #[cfg_attr(docsrs, doc(cfg(feature = "messagedb")))]
    pub mod messagedb {
        pub use refold_messagedb::{Error, MessageDbStore, RetryPolicy};
    }
}

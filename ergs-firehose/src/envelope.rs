use chrono::{DateTime, Utc};
use ergs_core::BlockView;
use serde::{Deserialize, Serialize};

/// The delivery strategy a session picked at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Push,
    Poll,
}

/// Wire envelopes sent over a firehose session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FirehoseEnvelope {
    Init {
        count: usize,
        blocks: Vec<BlockView>,
        mode: SessionMode,
        since: Option<DateTime<Utc>>,
    },
    Block {
        block: BlockView,
    },
    BlockBatch {
        count: usize,
        blocks: Vec<BlockView>,
        since: DateTime<Utc>,
    },
    Heartbeat {
        ts: DateTime<Utc>,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_serializes_with_tagged_type_field() {
        let envelope = FirehoseEnvelope::Init {
            count: 0,
            blocks: vec![],
            mode: SessionMode::Push,
            since: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["mode"], "push");
    }

    #[test]
    fn block_batch_tag_is_snake_case() {
        let envelope = FirehoseEnvelope::BlockBatch {
            count: 1,
            blocks: vec![],
            since: Utc::now(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "block_batch");
    }
}
